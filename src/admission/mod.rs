//! Request admission: per-client rate limiting and the resolved-intent cache.

mod cache;
mod rate_limit;

pub use cache::{IntentCache, TtlLruCache};
pub use rate_limit::{RateLimited, RateLimiter};

use std::time::{Duration, Instant};

use crate::config::AdmissionConfig;

pub struct AdmissionControl {
    limiter: RateLimiter,
    cache: IntentCache,
}

impl AdmissionControl {
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            limiter: RateLimiter::new(
                Duration::from_secs(config.window_secs),
                config.max_requests,
                config.max_tracked_clients,
            ),
            cache: IntentCache::new(
                config.cache_capacity,
                Duration::from_secs(config.cache_ttl_secs),
            ),
        }
    }

    /// Rate-limit key is `{group}:{client}` so each endpoint family has its own budget.
    pub fn admit(&self, group: &str, client: &str) -> Result<(), RateLimited> {
        self.limiter.check(&format!("{}:{}", group, client))
    }

    pub fn cache(&self) -> &IntentCache {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn sweep(&self) -> usize {
        self.limiter.sweep(Instant::now())
    }
}
