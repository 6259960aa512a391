//! Shared limiter for outbound chain requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::{Error, Result};

/// Bounded concurrency plus a minimum spacing between admissions per key.
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    spacing: Duration,
    poll_interval: Duration,
    last_admitted: Mutex<HashMap<String, Instant>>,
}

/// Held while a request is in flight.
#[derive(Debug)]
pub struct RatePermit {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(max_concurrent: usize, spacing: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            spacing,
            poll_interval: Duration::from_millis(50),
            last_admitted: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until a concurrency slot is free and `key` is due.
    pub async fn acquire(&self, key: &str) -> Result<RatePermit> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::Config("rate limiter closed".into()))?;

        loop {
            let wait = {
                let mut last = self.last_admitted.lock();
                let now = Instant::now();
                match last.get(key) {
                    Some(&at) if now < at + self.spacing => at + self.spacing - now,
                    _ => {
                        last.insert(key.to_string(), now);
                        break;
                    }
                }
            };
            tokio::time::sleep(wait.min(self.poll_interval)).await;
        }

        Ok(RatePermit { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spacing_per_key() {
        let limiter = RateLimiter::new(5, Duration::from_millis(120));
        let start = Instant::now();

        drop(limiter.acquire("mainnet").await.unwrap());
        drop(limiter.acquire("testnet").await.unwrap());
        assert!(start.elapsed() < Duration::from_millis(100));

        drop(limiter.acquire("mainnet").await.unwrap());
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let limiter = RateLimiter::new(2, Duration::ZERO);
        let a = limiter.acquire("k").await.unwrap();
        let _b = limiter.acquire("k").await.unwrap();
        assert_eq!(limiter.available(), 0);

        let blocked =
            tokio::time::timeout(Duration::from_millis(20), limiter.acquire("k")).await;
        assert!(blocked.is_err());

        drop(a);
        assert_eq!(limiter.available(), 1);
        assert!(limiter.acquire("k").await.is_ok());
    }
}
