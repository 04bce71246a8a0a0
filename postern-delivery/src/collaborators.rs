//! Contracts for the gateway's external collaborators.
//!
//! The decision pipeline owns none of the heavy machinery: the user
//! directory, the message store, the outbound queue, the filter engine and
//! the spam scorer all live elsewhere. These traits pin down exactly what
//! the core needs from each of them, and nothing more. Implementations
//! must tolerate concurrent calls from independent transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use postern_common::Address;

/// Classification of a resolved address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// A local mailbox.
    User,
    /// A forwarding address relaying to remote destinations.
    Forward,
}

impl TargetKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Forward => "forward",
        }
    }
}

/// Per-target delivery policy, resolved by the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPolicy {
    /// Storage quota in bytes. Zero means unlimited.
    #[serde(default)]
    pub quota_bytes: u64,

    /// Per-window message maximum for a user target. `None` falls back to
    /// the gateway default.
    #[serde(default)]
    pub max_recipients: Option<u64>,

    /// Per-window message maximum for a forward target. `None` falls back
    /// to the gateway default.
    #[serde(default)]
    pub max_forwards: Option<u64>,
}

/// Current storage usage for a user target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    /// Quota limit in bytes. Zero means unlimited.
    pub limit_bytes: u64,
    /// Bytes currently used.
    pub used_bytes: u64,
}

impl QuotaUsage {
    /// Whether the mailbox has no room left.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.limit_bytes > 0 && self.used_bytes >= self.limit_bytes
    }
}

/// Autoreply configuration attached to a user address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Autoreply {
    /// Start of the active window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the active window (exclusive).
    pub end: DateTime<Utc>,
    /// Reply subject.
    pub subject: String,
    /// Reply body.
    pub text: String,
    /// Minimum seconds between replies to the same correspondent; doubles
    /// as the rate-limit window for the autoreply counter.
    pub interval_secs: u64,
}

impl Autoreply {
    /// Whether `now` falls inside the `[start, end)` window.
    #[must_use]
    pub fn active_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.start && now < self.end
    }
}

/// What the directory knows about one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub kind: TargetKind,
    /// Stable identifier of the owning account or forward.
    pub owner_id: String,
    /// Administrative enabled flag; disabled mailboxes bounce.
    pub enabled: bool,
    pub policy: TargetPolicy,
    #[serde(default)]
    pub quota: QuotaUsage,
    /// Destinations a forward target relays to. Empty for users.
    #[serde(default)]
    pub forward_destinations: Vec<String>,
    /// Autoreply configuration, when the account has one active.
    #[serde(default)]
    pub autoreply: Option<Autoreply>,
}

/// Directory transport failures. Not-found is not an error; it is the
/// `Ok(None)` case of [`Directory::resolve_address`].
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// The user/forward directory.
#[async_trait]
pub trait Directory: Send + Sync + std::fmt::Debug {
    /// Resolve a normalized address to its classification, or `None` when
    /// the directory knows nothing about it.
    async fn resolve_address(
        &self,
        address: &Address,
    ) -> Result<Option<DirectoryEntry>, DirectoryError>;
}

/// Metadata accompanying a stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub transaction_id: String,
    pub sender: String,
    /// Destination folder, decided by filters and the spam verdict.
    pub folder: String,
}

/// Message-store failures. Quota exhaustion is distinguishable from
/// transport problems so the pipeline can isolate it per recipient.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("recipient over quota: {0}")]
    QuotaExceeded(String),

    #[error("message rejected by store: {0}")]
    Rejected(String),

    #[error("message store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Transport-level outages abort the whole transaction; everything
    /// else stays isolated to the one recipient.
    #[must_use]
    pub const fn is_outage(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// The mailbox persistence engine.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// Persist a message into a recipient's mailbox, returning the stored
    /// message id.
    async fn store_message(
        &self,
        recipient_id: &str,
        raw: &[u8],
        metadata: &StoreMetadata,
    ) -> Result<String, StoreError>;
}

/// Outbound-queue failures.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("outbound queue rejected message: {0}")]
    Rejected(String),

    #[error("outbound queue unavailable: {0}")]
    Unavailable(String),
}

/// The outbound delivery subsystem for forwarded and autoreply mail.
#[async_trait]
pub trait OutboundQueue: Send + Sync + std::fmt::Debug {
    /// Enqueue a message for remote delivery, returning the queue id.
    async fn enqueue(
        &self,
        envelope_from: &str,
        envelope_to: &str,
        raw: &[u8],
    ) -> Result<String, QueueError>;
}

/// Outcome of filter-rule evaluation for one recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterAction {
    /// Folder override; `None` leaves the verdict-based routing in place.
    pub folder: Option<String>,
    /// Drop the message for this recipient without storing it.
    pub discard: bool,
}

/// Filter-engine failures.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("filter engine unavailable: {0}")]
    Unavailable(String),
}

/// Per-recipient filter rules (sieve-style), evaluated before storage.
#[async_trait]
pub trait FilterEngine: Send + Sync + std::fmt::Debug {
    async fn evaluate(&self, recipient_id: &str, raw: &[u8]) -> Result<FilterAction, FilterError>;
}
