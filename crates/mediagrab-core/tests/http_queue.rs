//! End-to-end runs of the queue over the HTTP platform against a local server

use mediagrab_core::{DownloadPlatform, HttpPlatform, QueueConfig, QueueManager, RateLimiter};
use mediagrab_types::{ConflictAction, RawItem, Settings};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_test::assert_ok;

/// Minimal HTTP/1.1 server:
/// - `/ok/<name>` serves `payload-<name>`
/// - `/missing` answers 404
/// - `/flaky` answers 503 once, then 200
/// - `/slow` sends headers and a few bytes, then stalls
/// - `/hang` never answers
async fn serve() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let flaky_hits = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let flaky_hits = Arc::clone(&flaky_hits);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }

                let request = String::from_utf8_lossy(&buf);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

                if path == "/hang" {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    return;
                }
                if path == "/slow" {
                    let head = "HTTP/1.1 200 OK\r\nContent-Length: 1000000\r\nConnection: close\r\n\r\npartial";
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.flush().await;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    return;
                }

                let (status, body) = if let Some(name) = path.strip_prefix("/ok/") {
                    ("200 OK", format!("payload-{name}"))
                } else if path == "/flaky" {
                    if flaky_hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        ("503 Service Unavailable", String::new())
                    } else {
                        ("200 OK", "payload-flaky".to_string())
                    }
                } else {
                    ("404 Not Found", String::new())
                };

                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

fn loopback_client() -> reqwest::Client {
    // Bypass any proxy from the environment, the server is on loopback
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn wait_for_file(path: &Path) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !path.exists() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("file never appeared");
}

fn build_manager(base: &TempDir, conflict_action: ConflictAction, max_retries: u32) -> QueueManager {
    let settings = Settings {
        download_dir: base.path().to_path_buf(),
        conflict_action,
        ..Settings::default()
    };
    let platform = HttpPlatform::new(loopback_client(), RateLimiter::unlimited(), conflict_action);
    let config = QueueConfig {
        inter_item_delay: Duration::ZERO,
        poll_interval: Duration::from_millis(10),
        max_retries,
        ..QueueConfig::from_settings(&settings)
    };
    QueueManager::new(config, Arc::new(platform)).unwrap()
}

#[tokio::test]
async fn downloads_files_and_records_failures() {
    let addr = serve().await;
    let base = TempDir::new().unwrap();
    let manager = build_manager(&base, ConflictAction::Uniquify, 1);

    manager.enqueue(vec![
        RawItem::new(format!("http://{addr}/ok/a.jpg")),
        RawItem::new(format!("http://{addr}/ok/b.png")).with_subfolder("album"),
        RawItem::new(format!("http://{addr}/missing")),
    ]);
    let snapshot = assert_ok!(manager.start().await);

    assert_eq!(snapshot.completed, 2);
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.failed_filenames, vec!["missing.jpg".to_string()]);

    let a = tokio::fs::read_to_string(base.path().join("a.jpg")).await.unwrap();
    assert_eq!(a, "payload-a.jpg");
    let b = tokio::fs::read_to_string(base.path().join("album").join("b.png")).await.unwrap();
    assert_eq!(b, "payload-b.png");
    // Failed transfers leave nothing behind
    assert!(!base.path().join("missing.jpg").exists());

    let failed = manager.items().failed;
    assert!(failed[0].last_error.as_deref().unwrap_or("").contains("404"));
}

#[tokio::test]
async fn existing_files_are_not_overwritten() {
    let addr = serve().await;
    let base = TempDir::new().unwrap();
    tokio::fs::write(base.path().join("a.jpg"), "original").await.unwrap();

    let manager = build_manager(&base, ConflictAction::Uniquify, 0);
    manager.enqueue(vec![RawItem::new(format!("http://{addr}/ok/a.jpg"))]);
    manager.start().await.unwrap();

    let original = tokio::fs::read_to_string(base.path().join("a.jpg")).await.unwrap();
    assert_eq!(original, "original");
    let renamed = tokio::fs::read_to_string(base.path().join("a (1).jpg")).await.unwrap();
    assert_eq!(renamed, "payload-a.jpg");
}

#[tokio::test]
async fn overwrite_replaces_existing_files() {
    let addr = serve().await;
    let base = TempDir::new().unwrap();
    tokio::fs::write(base.path().join("a.jpg"), "original").await.unwrap();

    let manager = build_manager(&base, ConflictAction::Overwrite, 0);
    manager.enqueue(vec![RawItem::new(format!("http://{addr}/ok/a.jpg"))]);
    manager.start().await.unwrap();

    let content = tokio::fs::read_to_string(base.path().join("a.jpg")).await.unwrap();
    assert_eq!(content, "payload-a.jpg");
    assert!(!base.path().join("a (1).jpg").exists());
}

#[tokio::test]
async fn server_errors_are_retried() {
    let addr = serve().await;
    let base = TempDir::new().unwrap();
    let manager = build_manager(&base, ConflictAction::Uniquify, 2);

    manager.enqueue(vec![RawItem::new(format!("http://{addr}/flaky")).with_filename("flaky.gif")]);
    let snapshot = manager.start().await.unwrap();

    assert_eq!(snapshot.completed, 1);
    assert_eq!(manager.items().completed[0].retry_count, 1);
    let content = tokio::fs::read_to_string(base.path().join("flaky.gif")).await.unwrap();
    assert_eq!(content, "payload-flaky");
}

#[tokio::test]
async fn failed_overwrite_leaves_existing_file_alone() {
    let addr = serve().await;
    let base = TempDir::new().unwrap();
    tokio::fs::write(base.path().join("missing.jpg"), "original").await.unwrap();

    let manager = build_manager(&base, ConflictAction::Overwrite, 0);
    manager.enqueue(vec![RawItem::new(format!("http://{addr}/missing"))]);
    let snapshot = manager.start().await.unwrap();

    assert_eq!(snapshot.failed, 1);
    let content = tokio::fs::read_to_string(base.path().join("missing.jpg")).await.unwrap();
    assert_eq!(content, "original");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn same_named_items_get_distinct_files() {
    const COUNT: usize = 48;
    let addr = serve().await;
    let base = TempDir::new().unwrap();

    let settings = Settings {
        download_dir: base.path().to_path_buf(),
        ..Settings::default()
    };
    let platform = HttpPlatform::new(loopback_client(), RateLimiter::unlimited(), ConflictAction::Uniquify);
    let config = QueueConfig {
        max_concurrent: COUNT,
        inter_item_delay: Duration::ZERO,
        poll_interval: Duration::from_millis(5),
        max_retries: 0,
        ..QueueConfig::from_settings(&settings)
    };
    let manager = QueueManager::new(config, Arc::new(platform)).unwrap();

    manager.enqueue((0..COUNT).map(|_| RawItem::new(format!("http://{addr}/ok/same.jpg"))).collect());
    let snapshot = manager.start().await.unwrap();
    assert_eq!(snapshot.completed, COUNT);

    let mut files = 0;
    let mut entries = tokio::fs::read_dir(base.path()).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        let content = tokio::fs::read_to_string(entry.path()).await.unwrap();
        assert_eq!(content, "payload-same.jpg");
        files += 1;
    }
    assert_eq!(files, COUNT);
}

#[tokio::test]
async fn abort_removes_the_partial_file() {
    let addr = serve().await;
    let base = TempDir::new().unwrap();
    let platform = HttpPlatform::new(loopback_client(), RateLimiter::unlimited(), ConflictAction::Uniquify);
    let destination = base.path().join("part.bin");

    let handle = platform
        .download(&format!("http://{addr}/slow"), &destination)
        .await
        .unwrap();
    wait_for_file(&destination).await;

    platform.abort(handle).await;
    assert!(!destination.exists());
    assert_eq!(platform.tracked(), 0);
}

#[tokio::test]
async fn abort_before_response_keeps_existing_file() {
    let addr = serve().await;
    let base = TempDir::new().unwrap();
    let destination = base.path().join("keep.bin");
    tokio::fs::write(&destination, "original").await.unwrap();
    let platform = HttpPlatform::new(loopback_client(), RateLimiter::unlimited(), ConflictAction::Overwrite);

    let handle = platform
        .download(&format!("http://{addr}/hang"), &destination)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    platform.abort(handle).await;

    let content = tokio::fs::read_to_string(&destination).await.unwrap();
    assert_eq!(content, "original");
}
