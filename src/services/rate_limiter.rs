//! Rate limiter for login attempts
//!
//! Two sliding windows guard the login endpoint:
//! - 10 requests per IP address per minute
//! - 5 failed attempts per email per 15 minutes

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use tokio::sync::RwLock;

/// Requests allowed per IP inside [`IP_WINDOW_SECS`]
pub const IP_MAX_REQUESTS: usize = 10;
pub const IP_WINDOW_SECS: i64 = 60;

/// Failed attempts allowed per email inside [`EMAIL_WINDOW_SECS`]
pub const EMAIL_MAX_FAILURES: usize = 5;
pub const EMAIL_WINDOW_SECS: i64 = 15 * 60;

/// Timestamps of recent hits, keyed by `K`
struct SlidingWindow<K> {
    hits: RwLock<HashMap<K, Vec<DateTime<Utc>>>>,
    limit: usize,
    window: Duration,
}

impl<K: Eq + Hash> SlidingWindow<K> {
    fn new(limit: usize, window_secs: i64) -> Self {
        Self {
            hits: RwLock::new(HashMap::new()),
            limit,
            window: Duration::seconds(window_secs),
        }
    }

    async fn is_limited(&self, key: K, now: DateTime<Utc>) -> bool {
        let mut hits = self.hits.write().await;
        let cutoff = now - self.window;
        match hits.get_mut(&key) {
            Some(times) => {
                times.retain(|t| *t > cutoff);
                times.len() >= self.limit
            }
            None => false,
        }
    }

    async fn record(&self, key: K, now: DateTime<Utc>) {
        let mut hits = self.hits.write().await;
        hits.entry(key).or_default().push(now);
    }

    async fn clear(&self, key: &K) {
        self.hits.write().await.remove(key);
    }

    async fn purge(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        let mut hits = self.hits.write().await;
        let before = hits.len();
        hits.retain(|_, times| {
            times.retain(|t| *t > cutoff);
            !times.is_empty()
        });
        before - hits.len()
    }
}

/// Login rate limiter
pub struct LoginRateLimiter {
    by_email: SlidingWindow<String>,
    by_ip: SlidingWindow<IpAddr>,
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self {
            by_email: SlidingWindow::new(EMAIL_MAX_FAILURES, EMAIL_WINDOW_SECS),
            by_ip: SlidingWindow::new(IP_MAX_REQUESTS, IP_WINDOW_SECS),
        }
    }

    /// Whether the email has used up its failed attempts
    pub async fn is_email_limited(&self, email: &str) -> bool {
        self.by_email.is_limited(email.to_lowercase(), Utc::now()).await
    }

    pub async fn record_failed_attempt(&self, email: &str) {
        self.by_email.record(email.to_lowercase(), Utc::now()).await;
    }

    /// Forget failed attempts after a successful login
    pub async fn clear_email_attempts(&self, email: &str) {
        self.by_email.clear(&email.to_lowercase()).await;
    }

    pub async fn is_ip_limited(&self, ip: IpAddr) -> bool {
        self.by_ip.is_limited(ip, Utc::now()).await
    }

    pub async fn record_ip_request(&self, ip: IpAddr) {
        self.by_ip.record(ip, Utc::now()).await;
    }

    /// Drop entries with no hits left in their window.
    ///
    /// Returns the number of keys removed.
    pub async fn cleanup(&self) -> usize {
        let now = Utc::now();
        self.by_email.purge(now).await + self.by_ip.purge(now).await
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_email_limit_after_five_failures() {
        let limiter = LoginRateLimiter::new();

        for _ in 0..EMAIL_MAX_FAILURES - 1 {
            limiter.record_failed_attempt("pat@example.com").await;
        }
        assert!(!limiter.is_email_limited("pat@example.com").await);

        limiter.record_failed_attempt("PAT@example.com").await;
        assert!(limiter.is_email_limited("pat@example.com").await);

        limiter.clear_email_attempts("pat@example.com").await;
        assert!(!limiter.is_email_limited("pat@example.com").await);
    }

    #[tokio::test]
    async fn test_ip_limit_after_ten_requests() {
        let limiter = LoginRateLimiter::new();
        let ip: IpAddr = "10.0.0.7".parse().unwrap();
        let other: IpAddr = "10.0.0.8".parse().unwrap();

        for _ in 0..IP_MAX_REQUESTS {
            assert!(!limiter.is_ip_limited(ip).await);
            limiter.record_ip_request(ip).await;
        }
        assert!(limiter.is_ip_limited(ip).await);
        assert!(!limiter.is_ip_limited(other).await);
    }

    #[tokio::test]
    async fn test_window_expiry_and_purge() {
        let window: SlidingWindow<&str> = SlidingWindow::new(2, 60);
        let past = Utc::now() - Duration::seconds(120);

        window.record("a", past).await;
        window.record("a", past).await;
        assert!(window.is_limited("a", past).await);
        assert!(!window.is_limited("a", Utc::now()).await);

        window.record("b", past).await;
        assert_eq!(window.purge(Utc::now()).await, 2);
    }
}
