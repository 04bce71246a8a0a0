//! Embeddable mail-gateway decision engine.
//!
//! The [`Gateway`] ties the per-transaction machinery together behind one
//! handle: the hosting SMTP server calls [`Gateway::begin`] when a
//! transaction opens and then one method per protocol phase, each
//! returning the reply the server should send. All policy state lives in
//! the configuration and the injected collaborator backends; the gateway
//! itself holds no mutable state, so one instance serves every
//! connection.

pub mod config;
mod gateway;

pub use gateway::{Collaborators, DataVerdicts, Gateway};

pub use postern_common::{Address, PhaseCode, config::GatewayConfig};
pub use postern_delivery::{Outcome, QueueResult, Transaction, TransmissionType};
pub use postern_policy::{Protocol, Symbol, SymbolMap, Verdict, VerdictStatus};
