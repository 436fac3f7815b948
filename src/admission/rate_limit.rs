use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Rate limit exceeded for {client}: max {max} requests per {}s, retry in {}s", .window.as_secs(), .retry_after.as_secs().max(1))]
pub struct RateLimited {
    pub client: String,
    pub max: usize,
    pub window: Duration,
    pub retry_after: Duration,
}

/// Sliding-window limiter keyed by client id.
///
/// Each key owns an ordered queue of admission times. Timestamps that
/// left the window are pruned lazily when the key is checked; idle keys
/// are only dropped by [`RateLimiter::sweep`].
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
    window: Duration,
    max_requests: usize,
    max_tracked: usize,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: usize, max_tracked: usize) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            window,
            max_requests,
            max_tracked,
        }
    }

    pub fn check(&self, client: &str) -> Result<(), RateLimited> {
        self.check_at(client, Instant::now())
    }

    /// Admit one request at `now`. A rejected request is not recorded.
    pub fn check_at(&self, client: &str, now: Instant) -> Result<(), RateLimited> {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);

        if !buckets.contains_key(client) && buckets.len() >= self.max_tracked {
            let removed = sweep_locked(&mut buckets, self.window, now);
            tracing::debug!("Rate limiter at capacity; swept {} idle clients", removed);
        }

        let bucket = buckets.entry(client.to_string()).or_default();
        while let Some(&oldest) = bucket.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                bucket.pop_front();
            } else {
                break;
            }
        }

        if bucket.len() >= self.max_requests {
            let retry_after = bucket
                .front()
                .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(self.window);
            tracing::warn!("Rate limit exceeded for {}", client);
            return Err(RateLimited {
                client: client.to_string(),
                max: self.max_requests,
                window: self.window,
                retry_after,
            });
        }

        bucket.push_back(now);
        Ok(())
    }

    /// Drop clients with no admission inside the window. Returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        sweep_locked(&mut buckets, self.window, now)
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn sweep_locked(
    buckets: &mut HashMap<String, VecDeque<Instant>>,
    window: Duration,
    now: Instant,
) -> usize {
    let before = buckets.len();
    buckets.retain(|_, times| {
        times
            .back()
            .is_some_and(|newest| now.saturating_duration_since(*newest) < window)
    });
    before - buckets.len()
}
