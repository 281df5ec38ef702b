use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

const MAX_TRACKED_KEYS: usize = 10_000;

/// Time-windowed counter keyed by caller. Counts are approximate across
/// replicas; each process only sees its own hits.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Records a hit for `key` at `now` and returns whether it fits within
    /// `limit` hits over the trailing `window`. Rejected hits are not recorded.
    async fn check(&self, key: &str, limit: usize, window: Duration, now: DateTime<Utc>) -> bool;
}

#[derive(Default)]
pub struct SlidingWindowLimiter {
    hits: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn check(&self, key: &str, limit: usize, window: Duration, now: DateTime<Utc>) -> bool {
        let cutoff = now - window;
        let mut guard = self.hits.lock().await;
        if guard.len() > MAX_TRACKED_KEYS {
            guard.retain(|_, log| log.back().is_some_and(|last| *last > cutoff));
        }

        let log = guard.entry(key.to_string()).or_default();
        while log.front().is_some_and(|first| *first <= cutoff) {
            log.pop_front();
        }
        if log.len() >= limit {
            return false;
        }
        log.push_back(now);
        true
    }
}
