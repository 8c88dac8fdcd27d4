//! Reading download lists from the command line and manifest files
//!
//! A manifest is either a JSON array of items (`[{"url": ..., "filename": ...}]`)
//! or plain text with one URL per line. Blank lines and lines starting
//! with `#` are skipped in the text form.

use mediagrab_types::RawItem;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL on line {line}: {url}")]
    InvalidUrl { line: usize, url: String },

    #[error("Manifest item {index} has an empty URL")]
    EmptyUrl { index: usize },
}

pub async fn load_manifest(path: &Path) -> Result<Vec<RawItem>, ManifestError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    parse_manifest(&content)
}

pub fn parse_manifest(content: &str) -> Result<Vec<RawItem>, ManifestError> {
    if content.trim_start().starts_with('[') {
        let items: Vec<RawItem> = serde_json::from_str(content)?;
        if let Some(index) = items.iter().position(|item| item.url.trim().is_empty()) {
            return Err(ManifestError::EmptyUrl { index });
        }
        return Ok(items);
    }

    let mut items = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        items.push(parse_url(line, index + 1)?);
    }
    Ok(items)
}

/// Turn positional URL arguments into items, numbering them from 1
pub fn items_from_urls(urls: &[String]) -> Result<Vec<RawItem>, ManifestError> {
    urls.iter()
        .enumerate()
        .map(|(index, url)| parse_url(url.trim(), index + 1))
        .collect()
}

/// Give every item without a subfolder the default one
pub fn apply_default_subfolder(items: &mut [RawItem], subfolder: Option<&str>) {
    let Some(subfolder) = subfolder else {
        return;
    };
    for item in items.iter_mut().filter(|item| item.subfolder.is_none()) {
        item.subfolder = Some(subfolder.to_string());
    }
}

fn parse_url(text: &str, line: usize) -> Result<RawItem, ManifestError> {
    match url::Url::parse(text) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(RawItem::new(text)),
        _ => Err(ManifestError::InvalidUrl {
            line,
            url: text.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_manifest_skips_comments_and_blanks() {
        let content = "# gallery export\n\nhttps://cdn.example/a.jpg\n   \nhttps://cdn.example/b.png  \n";
        let items = parse_manifest(content).unwrap();
        let urls: Vec<_> = items.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, ["https://cdn.example/a.jpg", "https://cdn.example/b.png"]);
        assert!(items.iter().all(|i| i.filename.is_none() && i.subfolder.is_none()));
    }

    #[test]
    fn json_manifest_keeps_optional_fields() {
        let content = r#"[
            {"url": "https://cdn.example/a.jpg", "filename": "cover.jpg", "subfolder": "album"},
            {"url": "https://cdn.example/clip", "id": "item-7"}
        ]"#;
        let items = parse_manifest(content).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].filename.as_deref(), Some("cover.jpg"));
        assert_eq!(items[0].subfolder.as_deref(), Some("album"));
        assert_eq!(items[1].id.as_deref(), Some("item-7"));
    }

    #[test]
    fn bad_lines_report_their_line_number() {
        let err = parse_manifest("https://cdn.example/a.jpg\nnot a url\n").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidUrl { line: 2, .. }));

        let err = parse_manifest("ftp://cdn.example/a.jpg").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidUrl { line: 1, .. }));
    }

    #[test]
    fn json_items_need_a_url() {
        let err = parse_manifest(r#"[{"url": "https://x/a.jpg"}, {"url": " "}]"#).unwrap_err();
        assert!(matches!(err, ManifestError::EmptyUrl { index: 1 }));

        assert!(matches!(parse_manifest("[{\"url\": 3}]"), Err(ManifestError::Json(_))));
    }

    #[test]
    fn default_subfolder_does_not_override() {
        let mut items = vec![
            RawItem::new("https://x/a.jpg"),
            RawItem::new("https://x/b.jpg").with_subfolder("kept"),
        ];
        apply_default_subfolder(&mut items, Some("run"));
        assert_eq!(items[0].subfolder.as_deref(), Some("run"));
        assert_eq!(items[1].subfolder.as_deref(), Some("kept"));
    }

    #[test]
    fn positional_urls_are_validated() {
        let items = items_from_urls(&["https://x/a.jpg".to_string()]).unwrap();
        assert_eq!(items[0].url, "https://x/a.jpg");
        assert!(items_from_urls(&["https://x/a.jpg".to_string(), "nope".to_string()]).is_err());
    }

    #[tokio::test]
    async fn missing_manifest_is_a_read_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = load_manifest(&dir.path().join("absent.txt")).await.unwrap_err();
        assert!(matches!(err, ManifestError::Read { .. }));

        let path = dir.path().join("list.txt");
        tokio::fs::write(&path, "https://x/a.jpg\n").await.unwrap();
        assert_eq!(load_manifest(&path).await.unwrap().len(), 1);
    }
}
