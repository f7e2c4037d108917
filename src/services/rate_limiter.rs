//! In-memory sliding window rate limiters
//!
//! - [`RequestRateLimiter`]: N requests per window per client IP
//! - [`LoginRateLimiter`]: 5 failed logins per 15 minutes per email
//!
//! Both keep a list of timestamps per key and drop the ones that fell out of
//! the window on every check. `cleanup` removes idle keys and is driven by a
//! background task. Keys follow the `rate_limit:{client}:{endpoint}` cache
//! key scheme.

use crate::cache::CacheKeyBuilder;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const LOGIN_MAX_ATTEMPTS: usize = 5;
pub const LOGIN_WINDOW_MINUTES: i64 = 15;

/// Longest accepted request window, one week
pub const MAX_WINDOW_SECONDS: u64 = 7 * 24 * 60 * 60;

const REQUESTS_ENDPOINT: &str = "requests";
const LOGIN_ENDPOINT: &str = "login";

/// Timestamps per key within a fixed-length window
#[derive(Debug)]
struct SlidingWindow<K> {
    window: Duration,
    entries: Arc<RwLock<HashMap<K, Vec<DateTime<Utc>>>>>,
}

impl<K: Eq + Hash> SlidingWindow<K> {
    fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a hit unless `limit` is already reached.
    ///
    /// Returns the seconds until the oldest hit leaves the window when limited.
    async fn hit(&self, key: K, limit: usize, now: DateTime<Utc>) -> Result<(), u64> {
        let mut entries = self.entries.write().await;
        let times = entries.entry(key).or_default();
        let cutoff = now - self.window;
        times.retain(|time| *time > cutoff);

        if times.len() >= limit {
            return Err(retry_after(times.first().copied(), self.window, now));
        }
        times.push(now);
        Ok(())
    }

    async fn count(&self, key: &K, now: DateTime<Utc>) -> (usize, Option<DateTime<Utc>>) {
        let entries = self.entries.read().await;
        let cutoff = now - self.window;
        match entries.get(key) {
            Some(times) => {
                let live: Vec<_> = times.iter().filter(|t| **t > cutoff).collect();
                (live.len(), live.first().map(|t| **t))
            }
            None => (0, None),
        }
    }

    async fn record(&self, key: K, now: DateTime<Utc>) {
        self.entries.write().await.entry(key).or_default().push(now);
    }

    async fn clear(&self, key: &K) {
        self.entries.write().await.remove(key);
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, times| {
            times.retain(|time| *time > cutoff);
            !times.is_empty()
        });
        before - entries.len()
    }
}

fn retry_after(oldest: Option<DateTime<Utc>>, window: Duration, now: DateTime<Utc>) -> u64 {
    let seconds = oldest
        .map(|oldest| (oldest + window - now).num_seconds())
        .unwrap_or_else(|| window.num_seconds());
    seconds.max(1) as u64
}

/// Global per-client request limiter
#[derive(Debug)]
pub struct RequestRateLimiter {
    limit: usize,
    window: SlidingWindow<String>,
}

impl RequestRateLimiter {
    /// `window_seconds` is capped at [`MAX_WINDOW_SECONDS`]
    pub fn new(requests: u32, window_seconds: u64) -> Self {
        let seconds = window_seconds.min(MAX_WINDOW_SECONDS) as i64;
        Self {
            limit: requests as usize,
            window: SlidingWindow::new(Duration::seconds(seconds)),
        }
    }

    /// Count a request from `ip`; `Err(retry_after_seconds)` when over the limit
    pub async fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let key = CacheKeyBuilder::rate_limit(&ip.to_string(), REQUESTS_ENDPOINT);
        self.window.hit(key, self.limit, Utc::now()).await
    }

    /// Drop clients with no requests left in the window
    pub async fn cleanup(&self) -> usize {
        self.window.cleanup(Utc::now()).await
    }
}

/// Failed login throttle keyed by lowercased email
#[derive(Debug)]
pub struct LoginRateLimiter {
    window: SlidingWindow<String>,
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self {
            window: SlidingWindow::new(Duration::minutes(LOGIN_WINDOW_MINUTES)),
        }
    }

    /// `Err(retry_after_seconds)` when the email has too many recent failures
    pub async fn check(&self, email: &str) -> Result<(), u64> {
        let now = Utc::now();
        let (count, oldest) = self.window.count(&login_key(email), now).await;
        if count >= LOGIN_MAX_ATTEMPTS {
            return Err(retry_after(oldest, self.window.window, now));
        }
        Ok(())
    }

    pub async fn record_failed_attempt(&self, email: &str) {
        self.window.record(login_key(email), Utc::now()).await;
    }

    /// Forget failures after a successful login
    pub async fn clear(&self, email: &str) {
        self.window.clear(&login_key(email)).await;
    }

    pub async fn cleanup(&self) -> usize {
        self.window.cleanup(Utc::now()).await
    }
}

fn login_key(email: &str) -> String {
    CacheKeyBuilder::rate_limit(&email.to_lowercase(), LOGIN_ENDPOINT)
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
