//! Per-transaction decision pipeline for the Postern gateway.
//!
//! One SMTP transaction flows through four phases: MAIL sets the sender,
//! RCPT resolves each recipient through [`resolver::RecipientResolver`],
//! DATA captures the message and the authentication verdicts, and QUEUE
//! runs [`orchestrator::DeliveryOrchestrator`] over the finalized
//! [`transaction::Transaction`], committing rate-limit increments only on
//! success paths.

pub mod backends;
pub mod collaborators;
pub mod error;
pub mod headers;
pub mod orchestrator;
pub mod resolver;
pub mod transaction;

pub use collaborators::{
    Autoreply, Directory, DirectoryEntry, FilterAction, FilterEngine, MessageStore, OutboundQueue,
    QuotaUsage, StoreMetadata, TargetKind, TargetPolicy,
};
pub use error::{GatewayError, Outcome, PermanentError, SystemError, TemporaryError};
pub use orchestrator::{DeliveryOrchestrator, QueueResult};
pub use resolver::RecipientResolver;
pub use transaction::{ResolvedTarget, Transaction, TransmissionType};
