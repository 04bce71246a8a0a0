//! TTL-counter key-value store abstraction
//!
//! The rate limiter talks to a Redis-style counter store through this seam:
//! keys are strings, values are monotonically increasing counters that
//! expire after a TTL set at creation. Production deployments back this with
//! an external store; the in-memory implementation covers tests and
//! single-node setups.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

/// Errors from the counter backend.
#[derive(Debug, Error)]
pub enum CounterError {
    /// The backend cannot be reached or answered with a transport error.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Counter store contract.
///
/// Both operations must be atomic per key under concurrent callers:
/// `incr` is an atomic increment-and-read, `get` a consistent point read.
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Read the current counter value for `key`. Absent or expired keys
    /// read as zero.
    async fn get(&self, key: &str) -> Result<u64, CounterError>;

    /// Atomically add `delta` to `key` and return the new value. A key
    /// created by this call expires `ttl` after creation; increments on an
    /// existing key do not extend its lifetime.
    async fn incr(&self, key: &str, delta: u64, ttl: Duration) -> Result<u64, CounterError>;
}

#[derive(Debug)]
struct Bucket {
    count: u64,
    expires_at: Instant,
}

impl Bucket {
    fn expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory counter store
///
/// Counters live in a `DashMap`, so per-key atomicity comes from the shard
/// locks. Expiry is lazy: an expired bucket reads as zero and is replaced on
/// the next increment.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    buckets: DashMap<String, Bucket>,
    /// When set, every operation fails as unavailable. Test hook for
    /// exercising the limiter's outage policy.
    outage: AtomicBool,
}

impl MemoryCounterStore {
    /// Create a new empty counter store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a backend outage (or recovery) for subsequent operations.
    pub fn set_outage(&self, outage: bool) {
        self.outage.store(outage, Ordering::SeqCst);
    }

    fn check_outage(&self) -> Result<(), CounterError> {
        if self.outage.load(Ordering::SeqCst) {
            Err(CounterError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<u64, CounterError> {
        self.check_outage()?;

        let now = Instant::now();
        Ok(self
            .buckets
            .get(key)
            .filter(|bucket| !bucket.expired(now))
            .map_or(0, |bucket| bucket.count))
    }

    async fn incr(&self, key: &str, delta: u64, ttl: Duration) -> Result<u64, CounterError> {
        self.check_outage()?;

        let now = Instant::now();
        let mut entry = self
            .buckets
            .entry(key.to_string())
            .and_modify(|bucket| {
                if bucket.expired(now) {
                    bucket.count = 0;
                    bucket.expires_at = now + ttl;
                }
            })
            .or_insert_with(|| Bucket {
                count: 0,
                expires_at: now + ttl,
            });

        entry.count += delta;
        Ok(entry.count)
    }
}
