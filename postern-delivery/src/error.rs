//! Typed error handling for transaction processing.
//!
//! The taxonomy distinguishes:
//! - Permanent failures (5xx to the client) - never retried
//! - Temporary failures (4xx to the client) - the client may retry later
//! - System errors - internal problems
//!
//! Every permanent and temporary variant carries a stable reject code so
//! the event sink and the protocol caller agree on the reason vocabulary.

use std::time::Duration;

use thiserror::Error;

use postern_common::{PhaseCode, address::AddressError};
use postern_policy::{RateLimitError, Selector};

use crate::transaction::TransactionError;

/// Top-level error type for transaction processing.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Permanent failure; the recipient or message is rejected outright.
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Temporary failure; the client may retry later.
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    /// System-level error (internal invariants, I/O plumbing).
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Permanent errors that must not be retried.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// The address failed to parse as an envelope address.
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    /// Wildcard markers are directory patterns, never deliverable recipients.
    #[error("wildcard recipient not allowed: {0}")]
    WildcardRecipient(String),

    /// The directory knows no user or forward for the address.
    #[error("no such user: {0}")]
    NoSuchUser(String),

    /// The target mailbox exists but is administratively disabled.
    #[error("mailbox disabled: {0}")]
    MailboxDisabled(String),

    /// The target mailbox is over its storage quota.
    #[error("mailbox full: {0}")]
    MailboxFull(String),

    /// A blacklisted spam symbol matched.
    #[error("message rejected by policy: {0}")]
    PolicyReject(String),
}

impl PermanentError {
    /// Stable wire code for this rejection reason.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "INVALID_ADDRESS",
            Self::WildcardRecipient(_) => "WILDCARD_NOT_ALLOWED",
            Self::NoSuchUser(_) => "NO_SUCH_USER",
            Self::MailboxDisabled(_) => "MBOX_DISABLED",
            Self::MailboxFull(_) => "MBOX_FULL",
            Self::PolicyReject(_) => "POLICY_REJECT",
        }
    }
}

/// Temporary errors; the upstream client retries on its own schedule.
#[derive(Debug, Error)]
pub enum TemporaryError {
    /// A rate-limit dimension is over its maximum for the current window.
    #[error("rate limit reached ({selector}), retry after {} seconds", retry_after.as_secs())]
    RateLimited {
        selector: Selector,
        retry_after: Duration,
    },

    /// A collaborator did not answer within the bounded wait.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The directory answered with a transport error.
    #[error("directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// The rate-limit counter backend is degraded (fail-closed policy).
    #[error("rate limiter unavailable: {0}")]
    LimiterUnavailable(String),

    /// The message store answered with a transport error.
    #[error("message store unavailable: {0}")]
    StoreUnavailable(String),
}

impl TemporaryError {
    /// Stable wire code for this deferral reason.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "RATE_LIMIT",
            Self::Timeout(_) => "TIMEOUT",
            Self::DirectoryUnavailable(_) | Self::LimiterUnavailable(_) => "BACKEND_UNAVAILABLE",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
        }
    }
}

/// System-level errors that indicate internal problems.
#[derive(Debug, Error)]
pub enum SystemError {
    /// A transaction invariant was violated.
    #[error("transaction state error: {0}")]
    Transaction(#[from] TransactionError),

    /// Other internal errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns `true` if this error is permanent.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if this error is temporary.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// The stable reject code, where one exists. System errors surface as
    /// temporary to the client and carry the generic code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Permanent(permanent) => permanent.code(),
            Self::Temporary(temporary) => temporary.code(),
            Self::System(_) => "INTERNAL",
        }
    }
}

/// Counter-backend degradation is always a deferral, never a rejection.
impl From<RateLimitError> for GatewayError {
    fn from(error: RateLimitError) -> Self {
        match error {
            RateLimitError::Unavailable(message) => {
                Self::Temporary(TemporaryError::LimiterUnavailable(message))
            }
            RateLimitError::Timeout(_) => {
                Self::Temporary(TemporaryError::Timeout("rate limiter"))
            }
        }
    }
}

impl From<AddressError> for GatewayError {
    fn from(error: AddressError) -> Self {
        Self::Permanent(PermanentError::InvalidAddress(error))
    }
}

/// Tri-state outcome returned to the protocol-phase caller.
///
/// Every rejection and deferral carries the stable code plus a
/// human-readable reason; nothing is silently swallowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Reject {
        code: &'static str,
        reason: String,
    },
    Defer {
        code: &'static str,
        reason: String,
        retry_after: Option<Duration>,
    },
}

impl Outcome {
    /// Map this outcome to a protocol phase code.
    #[must_use]
    pub const fn phase_code(&self) -> PhaseCode {
        match self {
            Self::Accept => PhaseCode::Ok,
            Self::Reject { .. } => PhaseCode::Deny,
            Self::Defer { .. } => PhaseCode::DenySoft,
        }
    }

    #[must_use]
    pub const fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

impl From<GatewayError> for Outcome {
    fn from(error: GatewayError) -> Self {
        let code = error.code();
        match error {
            GatewayError::Permanent(permanent) => Self::Reject {
                code,
                reason: permanent.to_string(),
            },
            GatewayError::Temporary(temporary) => {
                let retry_after = match &temporary {
                    TemporaryError::RateLimited { retry_after, .. } => Some(*retry_after),
                    _ => None,
                };
                Self::Defer {
                    code,
                    reason: temporary.to_string(),
                    retry_after,
                }
            }
            // Internal problems defer: the client may retry once the
            // operator has fixed whatever broke.
            GatewayError::System(system) => Self::Defer {
                code,
                reason: system.to_string(),
                retry_after: None,
            },
        }
    }
}
