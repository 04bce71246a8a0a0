//! Multi-dimensional sliding-window rate limiting
//!
//! Counters are keyed by `selector:key`, where the selector names the
//! dimension (per-recipient, per-IP-per-recipient, per-forward-address,
//! per-autoreply-address) and the key identifies the subject. Each dimension
//! is an independent counter, so one call site can evaluate several of them
//! against the same transaction.
//!
//! The protocol is check-then-commit: [`RateLimiter::check`] never
//! increments, callers stage the keys they checked and call
//! [`RateLimiter::commit`] only once the transaction reaches a successful
//! terminal phase. Because `check` is read-only and committed counters carry
//! a TTL equal to their window, an abandoned transaction leaves nothing
//! behind that would not expire on its own.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::warn;

use postern_common::config::RateLimitConfig;

use crate::store::CounterStore;

/// A named rate-limit dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selector {
    /// Messages accepted for one recipient account.
    Rcpt,
    /// Messages accepted for one recipient account from one client IP.
    RcptIp,
    /// Messages relayed through one forward address.
    Forward,
    /// Autoreplies generated for one address.
    Autoreply,
}

impl Selector {
    /// Stable counter-key prefix for this dimension.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rcpt => "rcpt",
            Self::RcptIp => "rcpt_ip",
            Self::Forward => "fwd",
            Self::Autoreply => "autoreply",
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One counter to check now and possibly commit later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateKey {
    pub selector: Selector,
    pub key: String,
    pub window: Duration,
}

impl RateKey {
    #[must_use]
    pub fn new(selector: Selector, key: impl Into<String>, window: Duration) -> Self {
        Self {
            selector,
            key: key.into(),
            window,
        }
    }

    /// The composite backend key, `selector:key`.
    #[must_use]
    pub fn counter_key(&self) -> String {
        format!("{}:{}", self.selector, self.key)
    }

    /// Identity used to deduplicate commits within one transaction.
    #[must_use]
    pub fn dedup_key(&self) -> (Selector, &str) {
        (self.selector, self.key.as_str())
    }
}

/// Result of a non-mutating rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Under the limit, proceed.
    Allowed,
    /// Over the limit; retry once the window has passed.
    Limited { retry_after: Duration },
}

/// Rate limiter failures.
///
/// Both variants are temporary by definition: a rate-limited or
/// backend-degraded transaction is deferred, never permanently rejected.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The counter backend answered with an error.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// The counter backend did not answer within the bounded wait.
    #[error("counter store timed out after {0:?}")]
    Timeout(Duration),
}

/// Sliding-window rate limiter over a [`CounterStore`].
#[derive(Debug)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// The limiter's configuration (windows, maxima, failure policy).
    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check one counter against its maximum without incrementing it.
    ///
    /// Backend failure or timeout resolves per the configured outage
    /// policy: fail-open allows the subject through with a warning,
    /// fail-closed (the default) surfaces the error so the caller defers.
    pub async fn check(&self, key: &RateKey, max: u64) -> Result<RateDecision, RateLimitError> {
        let counter_key = key.counter_key();

        let count = match timeout(self.config.check_timeout(), self.store.get(&counter_key)).await {
            Ok(Ok(count)) => count,
            Ok(Err(source)) => {
                return self.on_outage(&counter_key, RateLimitError::Unavailable(source.to_string()));
            }
            Err(_) => {
                return self
                    .on_outage(&counter_key, RateLimitError::Timeout(self.config.check_timeout()));
            }
        };

        if count >= max {
            tracing::debug!(
                key = %counter_key,
                count,
                max,
                window_secs = key.window.as_secs(),
                "Rate limit exceeded"
            );
            Ok(RateDecision::Limited {
                retry_after: key.window,
            })
        } else {
            Ok(RateDecision::Allowed)
        }
    }

    /// Commit one increment for a key whose check passed earlier.
    ///
    /// The counter's TTL is the key's window, so the committed state ages
    /// out on its own. Idempotence is the caller's concern: deduplicate
    /// keys before committing.
    pub async fn commit(&self, key: &RateKey, delta: u64) -> Result<(), RateLimitError> {
        let counter_key = key.counter_key();

        match timeout(
            self.config.check_timeout(),
            self.store.incr(&counter_key, delta, key.window),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(source)) => Err(RateLimitError::Unavailable(source.to_string())),
            Err(_) => Err(RateLimitError::Timeout(self.config.check_timeout())),
        }
    }

    fn on_outage(
        &self,
        counter_key: &str,
        error: RateLimitError,
    ) -> Result<RateDecision, RateLimitError> {
        if self.config.fail_open {
            warn!(key = %counter_key, error = %error, "Counter store outage, failing open");
            Ok(RateDecision::Allowed)
        } else {
            Err(error)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::{CounterError, MemoryCounterStore};

    fn limiter(config: RateLimitConfig) -> (Arc<MemoryCounterStore>, RateLimiter) {
        let store = Arc::new(MemoryCounterStore::new());
        (store.clone(), RateLimiter::new(store, config))
    }

    fn rcpt_key() -> RateKey {
        RateKey::new(Selector::Rcpt, "user-1", Duration::from_secs(60))
    }

    #[tokio::test]
    async fn check_never_increments() {
        let (store, limiter) = limiter(RateLimitConfig::default());
        let key = rcpt_key();

        for _ in 0..10 {
            let decision = limiter.check(&key, 3).await.unwrap();
            assert_eq!(decision, RateDecision::Allowed);
        }

        assert_eq!(store.get(&key.counter_key()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn check_reflects_committed_count_only() {
        let (_, limiter) = limiter(RateLimitConfig::default());
        let key = rcpt_key();
        let max = 3;

        for _ in 0..max {
            assert_eq!(limiter.check(&key, max).await.unwrap(), RateDecision::Allowed);
            limiter.commit(&key, 1).await.unwrap();
        }

        // With max commits in the window, the next check is limited
        match limiter.check(&key, max).await.unwrap() {
            RateDecision::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(60));
            }
            RateDecision::Allowed => panic!("expected rate limit"),
        }
    }

    #[tokio::test]
    async fn selectors_are_independent_counters() {
        let (_, limiter) = limiter(RateLimitConfig::default());
        let window = Duration::from_secs(60);
        let per_user = RateKey::new(Selector::Rcpt, "user-1", window);
        let per_ip_user = RateKey::new(Selector::RcptIp, "user-1", window);

        limiter.commit(&per_user, 5).await.unwrap();

        assert_eq!(
            limiter.check(&per_ip_user, 5).await.unwrap(),
            RateDecision::Allowed
        );
        assert!(matches!(
            limiter.check(&per_user, 5).await.unwrap(),
            RateDecision::Limited { .. }
        ));
    }

    #[tokio::test]
    async fn outage_fails_closed_by_default() {
        let (store, limiter) = limiter(RateLimitConfig::default());
        store.set_outage(true);

        let err = limiter.check(&rcpt_key(), 3).await.unwrap_err();
        assert!(matches!(err, RateLimitError::Unavailable(_)));
    }

    #[tokio::test]
    async fn outage_fails_open_when_configured() {
        let (store, limiter) = limiter(RateLimitConfig {
            fail_open: true,
            ..RateLimitConfig::default()
        });
        store.set_outage(true);

        assert_eq!(
            limiter.check(&rcpt_key(), 3).await.unwrap(),
            RateDecision::Allowed
        );
    }

    /// Store whose futures never resolve, for exercising the bounded wait.
    #[derive(Debug)]
    struct HangingStore;

    #[async_trait::async_trait]
    impl CounterStore for HangingStore {
        async fn get(&self, _key: &str) -> Result<u64, CounterError> {
            std::future::pending().await
        }

        async fn incr(
            &self,
            _key: &str,
            _delta: u64,
            _ttl: Duration,
        ) -> Result<u64, CounterError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn check_times_out_after_bounded_wait() {
        let config = RateLimitConfig {
            check_timeout_secs: 8,
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(Arc::new(HangingStore), config);

        let err = limiter.check(&rcpt_key(), 3).await.unwrap_err();
        match err {
            RateLimitError::Timeout(waited) => assert_eq!(waited, Duration::from_secs(8)),
            RateLimitError::Unavailable(_) => panic!("expected timeout"),
        }
    }
}
