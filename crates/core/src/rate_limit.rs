//! Fixed-window rate limiting for external API keys.
//!
//! Counters live behind [`RateLimitStore`]. The bundled store is an in-process
//! `DashMap`; a multi-instance deployment swaps in a shared store that
//! increments atomically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;

use crate::types::Timestamp;

/// Requests allowed per window when not configured otherwise.
pub const DEFAULT_LIMIT_PER_WINDOW: u32 = 60;

/// Default window length in seconds.
pub const DEFAULT_WINDOW_SECS: i64 = 60;

/// Stale windows are swept on every Nth check.
pub const CLEANUP_EVERY: u64 = 100;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Counter state of one key's current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub count: u32,
    pub reset_at: Timestamp,
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count one request against `key`. Opens a fresh window (count 1) when
    /// none exists or the existing one has expired at `now`.
    async fn increment(&self, key: &str, now: Timestamp, window: Duration) -> WindowState;

    /// Drop windows that expired before `now`. Returns how many were removed.
    async fn purge_expired(&self, now: Timestamp) -> usize;
}

#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    windows: DashMap<String, WindowState>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn increment(&self, key: &str, now: Timestamp, window: Duration) -> WindowState {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(WindowState {
                count: 0,
                reset_at: now + window,
            });
        if now >= entry.reset_at {
            *entry = WindowState {
                count: 0,
                reset_at: now + window,
            };
        }
        entry.count = entry.count.saturating_add(1);
        *entry
    }

    async fn purge_expired(&self, now: Timestamp) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| w.reset_at > now);
        before.saturating_sub(self.windows.len())
    }
}

// ---------------------------------------------------------------------------
// Limiter
// ---------------------------------------------------------------------------

/// Outcome of an admitted request, used for the `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Rate limit of {limit} requests exceeded, retry after {retry_after_secs}s")]
pub struct RateLimitExceeded {
    pub limit: u32,
    pub retry_after_secs: u64,
    pub reset_at: Timestamp,
}

#[derive(Clone)]
pub struct FixedWindowRateLimiter {
    store: Arc<dyn RateLimitStore>,
    limit: u32,
    window: Duration,
    checks: Arc<AtomicU64>,
}

impl std::fmt::Debug for FixedWindowRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowRateLimiter")
            .field("limit", &self.limit)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl FixedWindowRateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, limit: u32, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
            checks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// In-memory limiter allowing `limit` requests per minute.
    pub fn per_minute(limit: u32) -> Self {
        Self::new(
            Arc::new(InMemoryRateLimitStore::new()),
            limit,
            Duration::seconds(DEFAULT_WINDOW_SECS),
        )
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub async fn check(&self, key: &str) -> Result<RateLimitStatus, RateLimitExceeded> {
        self.check_at(key, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        key: &str,
        now: Timestamp,
    ) -> Result<RateLimitStatus, RateLimitExceeded> {
        let n = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if n % CLEANUP_EVERY == 0 {
            let removed = self.store.purge_expired(now).await;
            if removed > 0 {
                tracing::debug!(removed, "Purged expired rate-limit windows");
            }
        }

        let state = self.store.increment(key, now, self.window).await;
        if state.count > self.limit {
            let millis = (state.reset_at - now).num_milliseconds().max(0) as u64;
            return Err(RateLimitExceeded {
                limit: self.limit,
                retry_after_secs: millis.div_ceil(1000).max(1),
                reset_at: state.reset_at,
            });
        }

        Ok(RateLimitStatus {
            limit: self.limit,
            remaining: self.limit - state.count,
            reset_at: state.reset_at,
        })
    }
}

impl Default for FixedWindowRateLimiter {
    fn default() -> Self {
        Self::per_minute(DEFAULT_LIMIT_PER_WINDOW)
    }
}
