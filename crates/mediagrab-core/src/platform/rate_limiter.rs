//! Token bucket limiting the combined throughput of all transfers

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Largest single acquisition, so concurrent transfers interleave fairly
const MAX_ACQUIRE: u64 = 16 * 1024;

/// Longest sleep between refill checks
const MAX_WAIT: Duration = Duration::from_millis(50);

/// Shared bandwidth limiter. Cloning shares the bucket.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    bucket: Option<Arc<Mutex<Bucket>>>,
}

#[derive(Debug)]
struct Bucket {
    /// Bytes per second, also the bucket capacity
    rate: u64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.001 {
            self.tokens = (self.tokens + elapsed * self.rate as f64).min(self.rate as f64);
            self.last_refill = now;
        }
    }
}

impl RateLimiter {
    /// Limit to `bytes_per_second`; zero means unlimited
    pub fn new(bytes_per_second: u64) -> Self {
        if bytes_per_second == 0 {
            return Self::unlimited();
        }
        Self {
            bucket: Some(Arc::new(Mutex::new(Bucket {
                rate: bytes_per_second,
                tokens: bytes_per_second as f64,
                last_refill: Instant::now(),
            }))),
        }
    }

    pub fn unlimited() -> Self {
        Self { bucket: None }
    }

    pub fn from_limit(limit: Option<u64>) -> Self {
        limit.map(Self::new).unwrap_or_else(Self::unlimited)
    }

    pub fn is_unlimited(&self) -> bool {
        self.bucket.is_none()
    }

    /// Wait until `bytes` may be transferred
    pub async fn acquire(&self, bytes: u64) {
        let Some(bucket) = &self.bucket else {
            return;
        };

        let mut remaining = bytes;
        while remaining > 0 {
            let chunk = remaining.min(MAX_ACQUIRE);
            let wait = {
                let mut state = bucket.lock().await;
                state.refill();
                // A chunk larger than the bucket could never be granted
                let needed = (chunk as f64).min(state.rate as f64);
                if state.tokens >= needed {
                    state.tokens -= needed;
                    remaining -= chunk;
                    Duration::ZERO
                } else {
                    let deficit = needed - state.tokens;
                    Duration::from_secs_f64(deficit / state.rate as f64).min(MAX_WAIT)
                }
            };

            if wait > Duration::ZERO {
                tokio::time::sleep(wait).await;
            }
        }
    }
}
