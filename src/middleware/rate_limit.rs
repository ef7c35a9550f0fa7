//! Per-key sliding window for login code requests and verification attempts.
//! Counts live in process memory only.
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct RateLimiter {
    hits: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    max_hits: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_hits: usize, window_secs: u64) -> Self {
        Self {
            hits: Arc::new(Mutex::new(HashMap::new())),
            max_hits,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Counts a hit for `key`. When the window is full nothing is recorded
    /// and the wait until the oldest hit expires is returned.
    pub async fn admit(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut hits = self.hits.lock().await;
        let window = hits.entry(key.to_string()).or_default();
        while window.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
            window.pop_front();
        }

        if window.len() >= self.max_hits {
            let oldest = window.front().copied().unwrap_or(now);
            return Err(self.window.saturating_sub(now.duration_since(oldest)));
        }
        window.push_back(now);
        Ok(())
    }

    /// Forgets keys with no hit inside the window; returns how many remain.
    pub async fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut hits = self.hits.lock().await;
        hits.retain(|_, window| window.back().is_some_and(|t| now.duration_since(*t) < self.window));
        hits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_window_reports_wait() {
        let limiter = RateLimiter::new(3, 60);
        for _ in 0..3 {
            assert!(limiter.admit("a@pakrut.com").await.is_ok());
        }
        let wait = limiter.admit("a@pakrut.com").await.unwrap_err();
        assert!(wait > Duration::from_secs(59) && wait <= Duration::from_secs(60));

        assert!(limiter.admit("b@pakrut.com").await.is_ok());
    }

    #[tokio::test]
    async fn expired_keys_are_forgotten() {
        let limiter = RateLimiter::new(5, 1);
        limiter.admit("a").await.ok();
        limiter.admit("b").await.ok();
        assert_eq!(limiter.cleanup().await, 2);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(limiter.cleanup().await, 0);
        assert!(limiter.admit("a").await.is_ok());
    }
}
