//! Configuration types for the Postern gateway.
//!
//! Everything here is constructor-injected into the components that need it;
//! there is no process-wide configuration state. Defaults follow the
//! `#[serde(default = "...")]` + `const fn` convention so a partial config
//! file is always valid.

use std::time::Duration;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::audit::AuditConfig;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Rate-limiting windows, maxima and failure policy.
    #[serde(default)]
    pub rate: RateLimitConfig,

    /// Spam classification lists and thresholds.
    #[serde(default)]
    pub spam: SpamConfig,

    /// Bounded-wait timeouts for collaborator I/O.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Audit event sink configuration.
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Configuration for the TTL-counter rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// How long to wait on the counter backend before giving up.
    #[serde(default = "default_check_timeout_secs")]
    pub check_timeout_secs: u64,

    /// Backend outage policy: `true` allows traffic through when the
    /// counter store is unreachable, `false` (the default) defers it.
    #[serde(default)]
    pub fail_open: bool,

    /// Sliding window for per-recipient counters.
    #[serde(default = "default_rcpt_window_secs")]
    pub rcpt_window_secs: u64,

    /// Sliding window for per-forward-address counters.
    #[serde(default = "default_forward_window_secs")]
    pub forward_window_secs: u64,

    /// Per-recipient maximum when the directory policy does not set one.
    #[serde(default = "default_rcpt_max")]
    pub default_rcpt_max: u64,

    /// Per-forward-address maximum when the directory policy does not set one.
    #[serde(default = "default_forward_max")]
    pub default_forward_max: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            check_timeout_secs: default_check_timeout_secs(),
            fail_open: false,
            rcpt_window_secs: default_rcpt_window_secs(),
            forward_window_secs: default_forward_window_secs(),
            default_rcpt_max: default_rcpt_max(),
            default_forward_max: default_forward_max(),
        }
    }
}

impl RateLimitConfig {
    /// Bounded wait for a single backend round trip.
    #[must_use]
    pub const fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    /// Per-recipient counter window.
    #[must_use]
    pub const fn rcpt_window(&self) -> Duration {
        Duration::from_secs(self.rcpt_window_secs)
    }

    /// Per-forward-address counter window.
    #[must_use]
    pub const fn forward_window(&self) -> Duration {
        Duration::from_secs(self.forward_window_secs)
    }
}

const fn default_check_timeout_secs() -> u64 {
    8
}

const fn default_rcpt_window_secs() -> u64 {
    3600
}

const fn default_forward_window_secs() -> u64 {
    3600
}

const fn default_rcpt_max() -> u64 {
    60
}

const fn default_forward_max() -> u64 {
    100
}

/// Spam-verdict classification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamConfig {
    /// Symbols that reject the transaction outright. Checked in list order.
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// Symbols that defer the transaction. Checked after the blacklist.
    #[serde(default)]
    pub softlist: Vec<String>,

    /// Forwards are skipped for messages scoring at or above this value.
    #[serde(default = "default_forward_skip")]
    pub forward_skip: f64,

    /// Messages scoring at or above this value are routed to the spam folder.
    #[serde(default = "default_spam_folder_score")]
    pub spam_folder_score: f64,

    /// Name of the spam folder.
    #[serde(default = "default_spam_folder")]
    pub spam_folder: String,

    /// Per-symbol rejection message templates. The literal `{host}` is
    /// replaced with the sender's domain.
    #[serde(default)]
    pub reject_templates: AHashMap<String, String>,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            blacklist: Vec::new(),
            softlist: Vec::new(),
            forward_skip: default_forward_skip(),
            spam_folder_score: default_spam_folder_score(),
            spam_folder: default_spam_folder(),
            reject_templates: AHashMap::new(),
        }
    }
}

const fn default_forward_skip() -> f64 {
    10.0
}

const fn default_spam_folder_score() -> f64 {
    8.0
}

fn default_spam_folder() -> String {
    "Junk".to_string()
}

/// Bounded-wait timeouts for collaborator I/O during a transaction.
///
/// A hit timeout is always a temporary, retryable outcome for the client,
/// never a permanent rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Directory lookups during RCPT.
    #[serde(default = "default_lookup_timeout_secs")]
    pub lookup_secs: u64,

    /// Message-store and outbound-queue calls during QUEUE.
    #[serde(default = "default_store_timeout_secs")]
    pub store_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            lookup_secs: default_lookup_timeout_secs(),
            store_secs: default_store_timeout_secs(),
        }
    }
}

impl TimeoutConfig {
    /// Directory lookup timeout.
    #[must_use]
    pub const fn lookup(&self) -> Duration {
        Duration::from_secs(self.lookup_secs)
    }

    /// Store/enqueue timeout.
    #[must_use]
    pub const fn store(&self) -> Duration {
        Duration::from_secs(self.store_secs)
    }
}

const fn default_lookup_timeout_secs() -> u64 {
    8
}

const fn default_store_timeout_secs() -> u64 {
    8
}
