//! In-memory collaborator implementations
//!
//! Each type keeps its state behind a `parking_lot::RwLock` so concurrent
//! transactions see consistent snapshots. All of them expose failure
//! injection (outage flags, per-recipient quota failures) so the
//! pipeline's isolation and abort paths can be exercised without a real
//! backend.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::RwLock;

use postern_common::Address;

use crate::collaborators::{
    Directory, DirectoryEntry, DirectoryError, FilterAction, FilterEngine, FilterError,
    MessageStore, OutboundQueue, QueueError, StoreError, StoreMetadata,
};

/// In-memory address directory
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: RwLock<AHashMap<String, DirectoryEntry>>,
    outage: AtomicBool,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry under a normalized address.
    pub fn insert(&self, address: &str, entry: DirectoryEntry) {
        self.entries.write().insert(address.to_string(), entry);
    }

    /// Simulate a directory outage (or recovery).
    pub fn set_outage(&self, outage: bool) {
        self.outage.store(outage, Ordering::SeqCst);
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn resolve_address(
        &self,
        address: &Address,
    ) -> Result<Option<DirectoryEntry>, DirectoryError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("simulated outage".to_string()));
        }

        Ok(self.entries.read().get(&address.to_string()).cloned())
    }
}

/// A message recorded by [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub recipient_id: String,
    pub raw: Vec<u8>,
    pub metadata: StoreMetadata,
}

/// In-memory message store
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: RwLock<Vec<StoredMessage>>,
    next_id: AtomicU64,
    outage: AtomicBool,
    /// Recipients whose stores fail with a quota error.
    over_quota: RwLock<Vec<String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make stores for `recipient_id` fail with a quota error.
    pub fn fail_with_quota(&self, recipient_id: &str) {
        self.over_quota.write().push(recipient_id.to_string());
    }

    /// Simulate a store outage (or recovery).
    pub fn set_outage(&self, outage: bool) {
        self.outage.store(outage, Ordering::SeqCst);
    }

    /// Snapshot of everything stored so far.
    #[must_use]
    pub fn messages(&self) -> Vec<StoredMessage> {
        self.messages.read().clone()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn store_message(
        &self,
        recipient_id: &str,
        raw: &[u8],
        metadata: &StoreMetadata,
    ) -> Result<String, StoreError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        if self
            .over_quota
            .read()
            .iter()
            .any(|id| id == recipient_id)
        {
            return Err(StoreError::QuotaExceeded(recipient_id.to_string()));
        }

        self.messages.write().push(StoredMessage {
            recipient_id: recipient_id.to_string(),
            raw: raw.to_vec(),
            metadata: metadata.clone(),
        });

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("msg-{id}"))
    }
}

/// A message handed to [`MemoryOutboundQueue`].
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub envelope_from: String,
    pub envelope_to: String,
    pub raw: Vec<u8>,
}

/// In-memory outbound queue
#[derive(Debug, Default)]
pub struct MemoryOutboundQueue {
    queued: RwLock<Vec<QueuedMessage>>,
    next_id: AtomicU64,
    /// Destinations whose enqueues fail.
    failing: RwLock<Vec<String>>,
}

impl MemoryOutboundQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make enqueues to `envelope_to` fail.
    pub fn fail_for(&self, envelope_to: &str) {
        self.failing.write().push(envelope_to.to_string());
    }

    /// Snapshot of everything enqueued so far.
    #[must_use]
    pub fn queued(&self) -> Vec<QueuedMessage> {
        self.queued.read().clone()
    }
}

#[async_trait]
impl OutboundQueue for MemoryOutboundQueue {
    async fn enqueue(
        &self,
        envelope_from: &str,
        envelope_to: &str,
        raw: &[u8],
    ) -> Result<String, QueueError> {
        if self.failing.read().iter().any(|to| to == envelope_to) {
            return Err(QueueError::Rejected(format!(
                "simulated failure for {envelope_to}"
            )));
        }

        self.queued.write().push(QueuedMessage {
            envelope_from: envelope_from.to_string(),
            envelope_to: envelope_to.to_string(),
            raw: raw.to_vec(),
        });

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("queue-{id}"))
    }
}

/// In-memory filter engine with fixed per-recipient actions
#[derive(Debug, Default)]
pub struct MemoryFilterEngine {
    actions: RwLock<AHashMap<String, FilterAction>>,
}

impl MemoryFilterEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the action returned for `recipient_id`.
    pub fn set_action(&self, recipient_id: &str, action: FilterAction) {
        self.actions.write().insert(recipient_id.to_string(), action);
    }
}

#[async_trait]
impl FilterEngine for MemoryFilterEngine {
    async fn evaluate(&self, recipient_id: &str, _raw: &[u8]) -> Result<FilterAction, FilterError> {
        Ok(self
            .actions
            .read()
            .get(recipient_id)
            .cloned()
            .unwrap_or_default())
    }
}
