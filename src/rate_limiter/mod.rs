//! Fixed-window rate limiting keyed by client IP.
//!
//! Two backends: an in-memory `DashMap` store for single-instance
//! deployments and tests, and Redis (`INCR` + `EXPIRE`) when running more
//! than one API instance. Redis failures fall back to allowing the request
//! rather than taking the API down with the cache.

use dashmap::DashMap;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 10,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after_secs: u64,
}

#[derive(Debug)]
struct WindowEntry {
    count: u32,
    window_start: Instant,
}

enum Backend {
    InMemory(DashMap<String, WindowEntry>),
    Redis(redis::aio::ConnectionManager),
}

pub struct RateLimiter {
    config: RateLimitConfig,
    backend: Backend,
}

impl RateLimiter {
    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self {
            config,
            backend: Backend::InMemory(DashMap::new()),
        }
    }

    pub fn redis(config: RateLimitConfig, conn: redis::aio::ConnectionManager) -> Self {
        Self {
            config,
            backend: Backend::Redis(conn),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Records one request for `key` and reports whether it stays within
    /// the window budget.
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        match &self.backend {
            Backend::InMemory(store) => self.check_in_memory(store, key),
            Backend::Redis(conn) => self.check_redis(conn.clone(), key).await,
        }
    }

    fn check_in_memory(&self, store: &DashMap<String, WindowEntry>, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut entry = store.entry(key.to_string()).or_insert_with(|| WindowEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count += 1;

        let allowed = entry.count <= self.config.requests_per_window;
        let remaining = self.config.requests_per_window.saturating_sub(entry.count);
        let retry_after = self
            .config
            .window
            .saturating_sub(now.duration_since(entry.window_start));

        if !allowed {
            debug!(key, count = entry.count, "Rate limit exceeded");
        }

        RateLimitDecision {
            allowed,
            remaining,
            retry_after_secs: retry_after.as_secs().max(1),
        }
    }

    async fn check_redis(
        &self,
        mut conn: redis::aio::ConnectionManager,
        key: &str,
    ) -> RateLimitDecision {
        let redis_key = format!("rate:{}", key);
        let window_secs = self.config.window.as_secs();

        let count: u32 = match conn.incr(&redis_key, 1u32).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Rate limit store unavailable, allowing request");
                return RateLimitDecision {
                    allowed: true,
                    remaining: self.config.requests_per_window,
                    retry_after_secs: 0,
                };
            }
        };
        if count == 1 {
            let _: Result<(), _> = conn.expire(&redis_key, window_secs as usize).await;
        }

        RateLimitDecision {
            allowed: count <= self.config.requests_per_window,
            remaining: self.config.requests_per_window.saturating_sub(count),
            retry_after_secs: window_secs.max(1),
        }
    }

    /// Drops in-memory entries whose window has passed. No-op for Redis,
    /// which expires keys itself.
    pub fn evict_expired(&self) {
        if let Backend::InMemory(store) = &self.backend {
            let window = self.config.window;
            store.retain(|_, entry| entry.window_start.elapsed() < window);
        }
    }
}

/// Spawns a periodic eviction task for an in-memory limiter.
pub fn spawn_eviction_task(limiter: Arc<RateLimiter>) {
    tokio::spawn(async move {
        let period = limiter.config.window.max(Duration::from_secs(60));
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            limiter.evict_expired();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::in_memory(RateLimitConfig {
            requests_per_window: limit,
            window: Duration::from_secs(window_secs),
        })
    }

    #[tokio::test]
    async fn allows_up_to_limit_then_blocks() {
        let limiter = limiter(3, 60);
        for _ in 0..3 {
            assert!(limiter.check("10.0.0.1").await.allowed);
        }
        let decision = limiter.check("10.0.0.1").await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = limiter(1, 60);
        assert!(limiter.check("10.0.0.1").await.allowed);
        assert!(!limiter.check("10.0.0.1").await.allowed);
        assert!(limiter.check("10.0.0.2").await.allowed);
    }

    #[tokio::test]
    async fn eviction_clears_stale_entries() {
        let limiter = limiter(1, 0);
        assert!(limiter.check("10.0.0.1").await.allowed);
        limiter.evict_expired();
        assert!(limiter.check("10.0.0.1").await.allowed);
    }
}
