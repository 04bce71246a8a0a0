//! Mutable per-message state threaded through all protocol phases.
//!
//! A [`Transaction`] is created when MAIL FROM arrives and destroyed when
//! the transaction ends. It owns the resolved recipient sets, the
//! rate-limit keys pending commit, the authentication verdicts and the
//! buffered message body. Mutators enforce the record's invariants:
//!
//! - every address classified as a user or forward is also in the
//!   recipient set, and never classified as both,
//! - sender, message data and the reject code are written at most once,
//! - `rate_keys` is append-only until the QUEUE commit phase.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use thiserror::Error;

use postern_common::{Address, config::GatewayConfig};
use postern_policy::{AuthVerdicts, RateKey};

use crate::collaborators::{Autoreply, TargetKind, TargetPolicy};

/// How the message reached us, derived once from the greeting and the TLS
/// state at transaction start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionType {
    Smtp,
    Esmtp,
    Esmtps,
}

impl TransmissionType {
    /// Derive the transmission type from the session's greeting and
    /// transport security.
    #[must_use]
    pub const fn derive(extended: bool, tls: bool) -> Self {
        match (extended, tls) {
            (true, true) => Self::Esmtps,
            (true, false) => Self::Esmtp,
            (false, _) => Self::Smtp,
        }
    }
}

impl std::fmt::Display for TransmissionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::Smtp => "SMTP",
            Self::Esmtp => "ESMTP",
            Self::Esmtps => "ESMTPS",
        };
        f.write_str(tag)
    }
}

/// A recipient resolved to its classification and policy. Read-only once
/// created; destroyed with the owning transaction.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub kind: TargetKind,
    pub owner_id: String,
    /// The normalized recipient address this target was resolved from.
    pub address: Address,
    pub policy: TargetPolicy,
    /// Rate-limit keys checked for this target, to be committed on the
    /// target's success path.
    pub rate_keys: Vec<RateKey>,
    /// Relay destinations when `kind` is `Forward`.
    pub forward_destinations: Vec<String>,
}

/// Transaction invariant violations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("sender already recorded")]
    SenderAlreadySet,

    #[error("message data already captured")]
    DataAlreadyCaptured,

    #[error("address classified as both user and forward: {0}")]
    ConflictingClassification(String),

    #[error("classified address missing from recipient set: {0}")]
    MissingRecipient(String),
}

/// The resolved target sets of one transaction.
#[derive(Debug, Default)]
pub struct Targets {
    users: AHashMap<String, ResolvedTarget>,
    forwards: AHashMap<String, ResolvedTarget>,
    recipients: AHashSet<String>,
    autoreplies: AHashMap<String, Autoreply>,
    forward_counters: AHashMap<String, u64>,
    kinds: AHashMap<String, TargetKind>,
}

impl Targets {
    /// Resolved user targets, keyed by owner id.
    #[must_use]
    pub const fn users(&self) -> &AHashMap<String, ResolvedTarget> {
        &self.users
    }

    /// Resolved forward targets, keyed by owner id.
    #[must_use]
    pub const fn forwards(&self) -> &AHashMap<String, ResolvedTarget> {
        &self.forwards
    }

    /// All accepted normalized recipient addresses.
    #[must_use]
    pub const fn recipients(&self) -> &AHashSet<String> {
        &self.recipients
    }

    /// Autoreply configurations, keyed by normalized address.
    #[must_use]
    pub const fn autoreplies(&self) -> &AHashMap<String, Autoreply> {
        &self.autoreplies
    }

    /// Pending forward-counter increments, keyed by counter key.
    #[must_use]
    pub const fn forward_counters(&self) -> &AHashMap<String, u64> {
        &self.forward_counters
    }

    /// Normalized addresses of all resolved user targets.
    #[must_use]
    pub fn user_addresses(&self) -> AHashSet<String> {
        self.users
            .values()
            .map(|target| target.address.to_string())
            .collect()
    }

    fn insert(&mut self, target: ResolvedTarget) -> Result<(), TransactionError> {
        let address = target.address.to_string();

        if let Some(existing) = self.kinds.get(&address)
            && *existing != target.kind
        {
            return Err(TransactionError::ConflictingClassification(address));
        }

        self.kinds.insert(address.clone(), target.kind);
        self.recipients.insert(address);
        match target.kind {
            TargetKind::User => self.users.insert(target.owner_id.clone(), target),
            TargetKind::Forward => self.forwards.insert(target.owner_id.clone(), target),
        };
        Ok(())
    }
}

/// Per-transaction state record.
#[derive(Debug)]
pub struct Transaction {
    id: ulid::Ulid,
    sender: Option<Address>,
    sender_recorded: bool,
    transmission: TransmissionType,
    targets: Targets,
    rate_keys: Vec<RateKey>,
    verdicts: AuthVerdicts,
    reject_code: Option<&'static str>,
    settings: Arc<GatewayConfig>,
    data: Option<Vec<u8>>,
}

impl Transaction {
    /// Start a new transaction with a settings snapshot. The id is
    /// generated once and never changes.
    #[must_use]
    pub fn new(transmission: TransmissionType, settings: Arc<GatewayConfig>) -> Self {
        Self {
            id: ulid::Ulid::new(),
            sender: None,
            sender_recorded: false,
            transmission,
            targets: Targets::default(),
            rate_keys: Vec::new(),
            verdicts: AuthVerdicts::default(),
            reject_code: None,
            settings,
            data: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> ulid::Ulid {
        self.id
    }

    #[must_use]
    pub const fn transmission(&self) -> TransmissionType {
        self.transmission
    }

    /// The settings snapshot resolved at transaction start.
    #[must_use]
    pub fn settings(&self) -> &GatewayConfig {
        &self.settings
    }

    /// Record the envelope sender. `None` is the null sender (bounces).
    /// May be called exactly once.
    pub fn record_sender(&mut self, sender: Option<Address>) -> Result<(), TransactionError> {
        if self.sender_recorded {
            return Err(TransactionError::SenderAlreadySet);
        }
        self.sender = sender;
        self.sender_recorded = true;
        Ok(())
    }

    #[must_use]
    pub const fn sender(&self) -> Option<&Address> {
        self.sender.as_ref()
    }

    /// The sender's canonical domain, empty for the null sender.
    #[must_use]
    pub fn sender_domain(&self) -> &str {
        self.sender
            .as_ref()
            .map_or("", |sender| sender.domain().as_str())
    }

    /// Envelope-from as a string, empty for the null sender.
    #[must_use]
    pub fn sender_string(&self) -> String {
        self.sender
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    #[must_use]
    pub const fn targets(&self) -> &Targets {
        &self.targets
    }

    /// Record a terminal reject code; the first rejection wins, later
    /// calls leave the recorded code untouched.
    pub fn record_reject(&mut self, code: &'static str) {
        if self.reject_code.is_none() {
            self.reject_code = Some(code);
        }
    }

    #[must_use]
    pub const fn reject_code(&self) -> Option<&'static str> {
        self.reject_code
    }

    /// Stage a resolved target plus its uncommitted rate keys. All
    /// mutations land together; the caller has already passed every check.
    pub fn stage_target(
        &mut self,
        target: ResolvedTarget,
        autoreply: Option<Autoreply>,
    ) -> Result<(), TransactionError> {
        let address = target.address.to_string();
        let keys = target.rate_keys.clone();

        self.targets.insert(target)?;
        if let Some(autoreply) = autoreply {
            self.targets.autoreplies.insert(address, autoreply);
        }
        self.rate_keys.extend(keys);
        Ok(())
    }

    /// Accumulate a pending forward-counter increment.
    pub fn stage_forward_counter(&mut self, counter_key: String, delta: u64) {
        *self.targets.forward_counters.entry(counter_key).or_insert(0) += delta;
    }

    /// All rate keys pending commit, in staging order.
    #[must_use]
    pub fn rate_keys(&self) -> &[RateKey] {
        &self.rate_keys
    }

    #[must_use]
    pub const fn verdicts(&self) -> &AuthVerdicts {
        &self.verdicts
    }

    pub const fn verdicts_mut(&mut self) -> &mut AuthVerdicts {
        &mut self.verdicts
    }

    /// Capture the message body. May be called exactly once, at DATA.
    pub fn capture_data(&mut self, raw: Vec<u8>) -> Result<(), TransactionError> {
        if self.data.is_some() {
            return Err(TransactionError::DataAlreadyCaptured);
        }
        self.data = Some(raw);
        Ok(())
    }

    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Check the record's cross-field invariants at a phase boundary.
    pub fn validate(&self) -> Result<(), TransactionError> {
        for target in self
            .targets
            .users
            .values()
            .chain(self.targets.forwards.values())
        {
            let address = target.address.to_string();
            if !self.targets.recipients.contains(&address) {
                return Err(TransactionError::MissingRecipient(address));
            }
        }
        Ok(())
    }
}
