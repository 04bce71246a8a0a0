//! Audit logging for transaction lifecycle events
//!
//! Every significant decision the gateway takes is emitted as a flat,
//! structured record carrying the transaction id, an action tag, and the
//! outcome, so an external event sink can reconstruct the full life of a
//! message without parsing free-form text.
//!
//! ## Audit Events
//!
//! - `RecipientAccepted` / `RecipientRejected`: RCPT-phase resolution result
//! - `ForwardResult`: per-target outcome of the forward stage
//! - `AutoreplyResult`: per-address outcome of the autoreply stage
//! - `StoreResult`: per-recipient outcome of the store stage
//! - `TransactionDone`: final phase code for the whole transaction
//!
//! ## PII Redaction
//!
//! Sender and recipient addresses can be redacted per configuration to
//! comply with privacy regulations (GDPR, HIPAA, etc.).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging for transaction lifecycle events
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redact sender email addresses from audit logs (PII protection)
    #[serde(default)]
    pub redact_sender: bool,

    /// Redact recipient email addresses from audit logs (PII protection)
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_sender: false,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

/// Global audit configuration (thread-safe)
static AUDIT_CONFIG: std::sync::OnceLock<Arc<AuditConfig>> = std::sync::OnceLock::new();

/// Initialize audit logging with configuration
pub fn init(config: AuditConfig) {
    AUDIT_CONFIG.get_or_init(|| Arc::new(config));
}

/// Get the current audit configuration
#[must_use]
pub fn config() -> Arc<AuditConfig> {
    AUDIT_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(AuditConfig::default()))
}

/// Redact email address if redaction is enabled
#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if redact {
        // Keep domain but redact local part
        if let Some((_, domain)) = email.split_once('@') {
            format!("[REDACTED]@{domain}")
        } else {
            "[REDACTED]".to_string()
        }
    } else {
        email.to_string()
    }
}

/// Log recipient accepted event (RCPT phase)
pub fn log_recipient_accepted(transaction_id: &str, recipient: &str, kind: &str) {
    let config = config();
    if !config.enabled {
        return;
    }

    let recipient = redact_email(recipient, config.redact_recipients);

    tracing::event!(
        tracing::Level::INFO,
        event = "RecipientAccepted",
        transaction_id = %transaction_id,
        action = "rcpt",
        outcome = "accept",
        recipient = %recipient,
        kind = %kind,
        "Audit: Recipient accepted"
    );
}

/// Log recipient rejected event (RCPT phase)
///
/// `code` is the stable reject code (`NO_SUCH_USER`, `MBOX_FULL`, ...),
/// `permanent` distinguishes 5xx from 4xx outcomes.
pub fn log_recipient_rejected(transaction_id: &str, recipient: &str, code: &str, permanent: bool) {
    let config = config();
    if !config.enabled {
        return;
    }

    let recipient = redact_email(recipient, config.redact_recipients);

    tracing::event!(
        tracing::Level::INFO,
        event = "RecipientRejected",
        transaction_id = %transaction_id,
        action = "rcpt",
        outcome = if permanent { "reject" } else { "defer" },
        recipient = %recipient,
        code = %code,
        "Audit: Recipient rejected"
    );
}

/// Log forward stage result for one target
pub fn log_forward_result(
    transaction_id: &str,
    sender: &str,
    recipient: &str,
    queue_id: Option<&str>,
    error: Option<&str>,
) {
    let config = config();
    if !config.enabled {
        return;
    }

    let sender = redact_email(sender, config.redact_sender);
    let recipient = redact_email(recipient, config.redact_recipients);

    tracing::event!(
        tracing::Level::INFO,
        event = "ForwardResult",
        transaction_id = %transaction_id,
        action = "forward",
        outcome = if error.is_none() { "success" } else { "failure" },
        sender = %sender,
        recipient = %recipient,
        queue_id = queue_id.unwrap_or("-"),
        error = error.unwrap_or("-"),
        "Audit: Forward processed"
    );
}

/// Log autoreply stage result for one address
pub fn log_autoreply_result(
    transaction_id: &str,
    address: &str,
    sent: bool,
    detail: &str,
) {
    let config = config();
    if !config.enabled {
        return;
    }

    let address = redact_email(address, config.redact_recipients);

    tracing::event!(
        tracing::Level::INFO,
        event = "AutoreplyResult",
        transaction_id = %transaction_id,
        action = "autoreply",
        outcome = if sent { "sent" } else { "skipped" },
        address = %address,
        detail = %detail,
        "Audit: Autoreply processed"
    );
}

/// Log store stage result for one recipient
pub fn log_store_result(
    transaction_id: &str,
    recipient: &str,
    folder: &str,
    message_id: Option<&str>,
    error: Option<&str>,
) {
    let config = config();
    if !config.enabled {
        return;
    }

    let recipient = redact_email(recipient, config.redact_recipients);

    tracing::event!(
        tracing::Level::INFO,
        event = "StoreResult",
        transaction_id = %transaction_id,
        action = "store",
        outcome = if error.is_none() { "stored" } else { "failure" },
        recipient = %recipient,
        folder = %folder,
        message_id = message_id.unwrap_or("-"),
        error = error.unwrap_or("-"),
        "Audit: Message stored"
    );
}

/// Log final transaction outcome (QUEUE phase terminal state)
pub fn log_transaction_done(transaction_id: &str, code: &str, reason: Option<&str>) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "TransactionDone",
        transaction_id = %transaction_id,
        action = "queue",
        outcome = %code,
        reason = reason.unwrap_or("-"),
        "Audit: Transaction finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_email() {
        assert_eq!(
            redact_email("user@example.com", true),
            "[REDACTED]@example.com"
        );
        assert_eq!(redact_email("user@example.com", false), "user@example.com");
        assert_eq!(redact_email("invalid", true), "[REDACTED]");
    }

    #[test]
    fn test_default_config() {
        let config = AuditConfig::default();
        assert!(config.enabled);
        assert!(!config.redact_sender);
        assert!(!config.redact_recipients);
    }

    #[test]
    fn test_audit_disabled() {
        init(AuditConfig {
            enabled: false,
            redact_sender: false,
            redact_recipients: false,
        });

        // These should not panic even when disabled
        log_recipient_accepted("txn", "rcpt@example.com", "user");
        log_recipient_rejected("txn", "rcpt@example.com", "NO_SUCH_USER", true);
        log_forward_result("txn", "a@x.com", "b@y.com", Some("q1"), None);
        log_autoreply_result("txn", "rcpt@example.com", false, "outside window");
        log_store_result("txn", "rcpt@example.com", "INBOX", Some("m1"), None);
        log_transaction_done("txn", "OK", None);
    }
}
