//! QUEUE-phase delivery pipeline.
//!
//! Stages run in a fixed order: spam gate, forwards, autoreplies, local
//! store, then the single commit of every rate-limit increment earned
//! along the way. Per-recipient failures stay isolated to that recipient;
//! only a store outage or timeout aborts the remaining work, and even
//! then the increments already earned are committed so the retry counts.

use std::sync::Arc;

use ahash::AHashMap;
use chrono::Utc;
use tokio::time::timeout;
use tracing::{instrument, warn};

use postern_common::{PhaseCode, audit};
use postern_policy::{
    RateDecision, RateKey, RateLimiter, Selector, SpamAction, SymbolMap, classify,
    rejection_message, total_score,
};

use crate::{
    collaborators::{
        Autoreply, FilterAction, FilterEngine, MessageStore, OutboundQueue, StoreError,
        StoreMetadata,
    },
    headers::referenced_users,
    transaction::{ResolvedTarget, Transaction},
};

/// Terminal result of the QUEUE phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueResult {
    pub code: PhaseCode,
    /// Reply text for the client; `None` uses the server's stock reply.
    pub message: Option<String>,
}

impl QueueResult {
    fn done(txn: &Transaction, code: PhaseCode, message: Option<String>) -> Self {
        audit::log_transaction_done(
            &txn.id().to_string(),
            &code.to_string(),
            message.as_deref(),
        );
        Self { code, message }
    }
}

/// Increments earned during the pipeline, committed together at the end.
///
/// Keys are deduplicated on their counter key, so a dimension shared by
/// several stages (or several recipients resolving to one owner) is
/// incremented once per message, while forward counters accumulate one
/// increment per relayed copy.
#[derive(Debug, Default)]
struct CommitSet {
    entries: AHashMap<String, (RateKey, u64)>,
}

impl CommitSet {
    /// Stage a single increment for this key, once per message.
    fn stage_once(&mut self, key: &RateKey) {
        self.entries
            .entry(key.counter_key())
            .or_insert_with(|| (key.clone(), 1));
    }

    /// Accumulate `delta` increments for this key.
    fn stage_delta(&mut self, key: &RateKey, delta: u64) {
        self.entries
            .entry(key.counter_key())
            .or_insert_with(|| (key.clone(), 0))
            .1 += delta;
    }
}

/// Runs the delivery pipeline for an accepted message.
#[derive(Debug)]
pub struct DeliveryOrchestrator {
    store: Arc<dyn MessageStore>,
    queue: Arc<dyn OutboundQueue>,
    filters: Option<Arc<dyn FilterEngine>>,
    limiter: Arc<RateLimiter>,
}

impl DeliveryOrchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        queue: Arc<dyn OutboundQueue>,
        filters: Option<Arc<dyn FilterEngine>>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            store,
            queue,
            filters,
            limiter,
        }
    }

    /// Run the full pipeline for one transaction.
    ///
    /// Never returns an error: every failure mode maps to a phase code.
    /// Unexpected internal states defer so the client retries.
    #[instrument(level = "debug", skip_all, fields(transaction_id = %txn.id()))]
    pub async fn run(&self, txn: &mut Transaction, symbols: &SymbolMap) -> QueueResult {
        if let Err(error) = txn.validate() {
            warn!("transaction failed validation: {error}");
            return QueueResult::done(
                txn,
                PhaseCode::DenySoft,
                Some("internal error, try again later".to_string()),
            );
        }

        let spam = &txn.settings().spam;
        match classify(symbols, &spam.blacklist, &spam.softlist) {
            SpamAction::Reject { symbol } => {
                let message =
                    rejection_message(&symbol, txn.sender_domain(), &spam.reject_templates);
                // Nothing is committed for a rejected message.
                txn.record_reject("POLICY_REJECT");
                return QueueResult::done(txn, PhaseCode::Deny, Some(message));
            }
            SpamAction::Defer { symbol } => {
                warn!(symbol = %symbol, "soft spam match, deferring");
                return QueueResult::done(
                    txn,
                    PhaseCode::DenySoft,
                    Some("message temporarily deferred, try again later".to_string()),
                );
            }
            SpamAction::Accept => {}
        }

        let Some(data) = txn.data().map(<[u8]>::to_vec) else {
            warn!("queue phase reached without captured message data");
            return QueueResult::done(
                txn,
                PhaseCode::DenySoft,
                Some("internal error, try again later".to_string()),
            );
        };

        let mut commits = CommitSet::default();

        self.forward_stage(txn, symbols, &data, &mut commits).await;
        self.autoreply_stage(txn, &data, &mut commits).await;

        if let Err(result) = self.store_stage(txn, symbols, &data, &mut commits).await {
            // Increments already earned still count against the window.
            self.commit(txn, commits).await;
            return result;
        }

        self.commit(txn, commits).await;
        QueueResult::done(txn, PhaseCode::Ok, None)
    }

    /// Relay one copy of the message per forward destination. Skipped
    /// wholesale when the aggregate spam score is high enough that relaying
    /// would damage our sending reputation; the local store still runs.
    async fn forward_stage(
        &self,
        txn: &mut Transaction,
        symbols: &SymbolMap,
        data: &[u8],
        commits: &mut CommitSet,
    ) {
        let score = total_score(symbols);
        let threshold = txn.settings().spam.forward_skip;
        if score >= threshold {
            warn!(score, threshold, "spam score too high, skipping forwards");
            return;
        }

        let forwards: Vec<ResolvedTarget> =
            txn.targets().forwards().values().cloned().collect();
        let txn_id = txn.id().to_string();
        let sender = txn.sender_string();
        let store_wait = txn.settings().timeouts.store();

        for target in forwards {
            let mut relayed = 0u64;
            for destination in &target.forward_destinations {
                let attempt =
                    timeout(store_wait, self.queue.enqueue(&sender, destination, data)).await;
                match attempt {
                    Ok(Ok(queue_id)) => {
                        relayed += 1;
                        audit::log_forward_result(
                            &txn_id,
                            &sender,
                            destination,
                            Some(&queue_id),
                            None,
                        );
                    }
                    Ok(Err(error)) => {
                        audit::log_forward_result(
                            &txn_id,
                            &sender,
                            destination,
                            None,
                            Some(&error.to_string()),
                        );
                    }
                    Err(_) => {
                        audit::log_forward_result(
                            &txn_id,
                            &sender,
                            destination,
                            None,
                            Some("timed out"),
                        );
                    }
                }
            }

            if relayed > 0 {
                for key in &target.rate_keys {
                    commits.stage_delta(key, relayed);
                    txn.stage_forward_counter(key.counter_key(), relayed);
                }
            }
        }
    }

    /// Send vacation replies for user targets with an active autoreply.
    ///
    /// A reply goes out only when the owner is visibly addressed in To or
    /// Cc, the sender is not the null sender, and the per-address interval
    /// counter has room. Failures here never affect the message itself.
    async fn autoreply_stage(&self, txn: &mut Transaction, data: &[u8], commits: &mut CommitSet) {
        let txn_id = txn.id().to_string();
        let Some(sender) = txn.sender().map(ToString::to_string) else {
            // Bounces and other null-sender mail never get a reply.
            return;
        };

        let referenced = referenced_users(data, &txn.targets().user_addresses());
        let now = Utc::now();
        let store_wait = txn.settings().timeouts.store();

        let autoreplies: Vec<(String, Autoreply)> = txn
            .targets()
            .autoreplies()
            .iter()
            .map(|(address, autoreply)| (address.clone(), autoreply.clone()))
            .collect();

        for (address, autoreply) in autoreplies {
            if !autoreply.active_at(now) {
                audit::log_autoreply_result(&txn_id, &address, false, "outside active window");
                continue;
            }
            if !referenced.contains(&address) {
                audit::log_autoreply_result(&txn_id, &address, false, "not addressed in headers");
                continue;
            }

            let key = RateKey::new(
                Selector::Autoreply,
                address.clone(),
                std::time::Duration::from_secs(autoreply.interval_secs),
            );
            match self.limiter.check(&key, 1).await {
                Ok(RateDecision::Allowed) => {}
                Ok(RateDecision::Limited { .. }) => {
                    audit::log_autoreply_result(&txn_id, &address, false, "within reply interval");
                    continue;
                }
                Err(error) => {
                    audit::log_autoreply_result(&txn_id, &address, false, &error.to_string());
                    continue;
                }
            }

            let reply = render_autoreply(&address, &sender, &autoreply);
            let attempt =
                timeout(store_wait, self.queue.enqueue("", &sender, reply.as_bytes())).await;
            match attempt {
                Ok(Ok(queue_id)) => {
                    commits.stage_once(&key);
                    audit::log_autoreply_result(&txn_id, &address, true, &queue_id);
                }
                Ok(Err(error)) => {
                    audit::log_autoreply_result(&txn_id, &address, false, &error.to_string());
                }
                Err(_) => {
                    audit::log_autoreply_result(&txn_id, &address, false, "timed out");
                }
            }
        }
    }

    /// Persist the message into each user target's mailbox.
    ///
    /// Quota and filter rejections stay isolated to the one recipient; a
    /// store outage or timeout aborts with a deferral since the remaining
    /// recipients would hit the same wall.
    async fn store_stage(
        &self,
        txn: &mut Transaction,
        symbols: &SymbolMap,
        data: &[u8],
        commits: &mut CommitSet,
    ) -> Result<(), QueueResult> {
        let users: Vec<ResolvedTarget> = txn.targets().users().values().cloned().collect();
        let txn_id = txn.id().to_string();
        let sender = txn.sender_string();
        let store_wait = txn.settings().timeouts.store();
        let spam = txn.settings().spam.clone();
        let score = total_score(symbols);

        for target in users {
            let action = self.filter_action(&target.owner_id, data).await;
            if action.discard {
                audit::log_store_result(
                    &txn_id,
                    &target.owner_id,
                    "-",
                    None,
                    Some("discarded by filter"),
                );
                continue;
            }

            let folder = action.folder.clone().unwrap_or_else(|| {
                if score >= spam.spam_folder_score {
                    spam.spam_folder.clone()
                } else {
                    "INBOX".to_string()
                }
            });

            let metadata = StoreMetadata {
                transaction_id: txn_id.clone(),
                sender: sender.clone(),
                folder: folder.clone(),
            };
            let attempt = timeout(
                store_wait,
                self.store.store_message(&target.owner_id, data, &metadata),
            )
            .await;

            match attempt {
                Ok(Ok(message_id)) => {
                    for key in &target.rate_keys {
                        commits.stage_once(key);
                    }
                    audit::log_store_result(
                        &txn_id,
                        &target.owner_id,
                        &folder,
                        Some(&message_id),
                        None,
                    );
                }
                Ok(Err(error)) if error.is_outage() => {
                    audit::log_store_result(
                        &txn_id,
                        &target.owner_id,
                        &folder,
                        None,
                        Some(&error.to_string()),
                    );
                    return Err(QueueResult::done(
                        txn,
                        PhaseCode::DenySoft,
                        Some("message store unavailable, try again later".to_string()),
                    ));
                }
                Ok(Err(error)) => {
                    // Quota or store-side rejection: this recipient only.
                    audit::log_store_result(
                        &txn_id,
                        &target.owner_id,
                        &folder,
                        None,
                        Some(&error.to_string()),
                    );
                    if let StoreError::QuotaExceeded(_) = error {
                        warn!(recipient = %target.owner_id, "mailbox filled up mid-transaction");
                    }
                }
                Err(_) => {
                    audit::log_store_result(
                        &txn_id,
                        &target.owner_id,
                        &folder,
                        None,
                        Some("timed out"),
                    );
                    return Err(QueueResult::done(
                        txn,
                        PhaseCode::DenySoft,
                        Some("message store unavailable, try again later".to_string()),
                    ));
                }
            }
        }

        Ok(())
    }

    async fn filter_action(&self, recipient_id: &str, data: &[u8]) -> FilterAction {
        let Some(filters) = &self.filters else {
            return FilterAction::default();
        };
        match filters.evaluate(recipient_id, data).await {
            Ok(action) => action,
            Err(error) => {
                // A broken filter engine must not block delivery.
                warn!(recipient_id, "filter evaluation failed: {error}");
                FilterAction::default()
            }
        }
    }

    /// Commit every staged increment. Commit failures are logged and
    /// dropped; the message has already been accepted at this point and
    /// an undercounted window is the lesser harm.
    async fn commit(&self, txn: &Transaction, commits: CommitSet) {
        for (key, delta) in commits.entries.into_values() {
            if let Err(error) = self.limiter.commit(&key, delta).await {
                warn!(
                    transaction_id = %txn.id(),
                    counter = %key.counter_key(),
                    "rate commit failed: {error}"
                );
            }
        }
    }
}

/// Render a minimal RFC 5322 autoreply message.
fn render_autoreply(owner: &str, sender: &str, autoreply: &Autoreply) -> String {
    format!(
        "From: <{owner}>\r\n\
         To: <{sender}>\r\n\
         Subject: {subject}\r\n\
         Date: {date}\r\n\
         Auto-Submitted: auto-replied\r\n\
         \r\n\
         {text}\r\n",
        subject = autoreply.subject,
        date = Utc::now().to_rfc2822(),
        text = autoreply.text,
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{net::IpAddr, sync::Arc};

    use chrono::{TimeDelta, Utc};

    use postern_common::config::GatewayConfig;
    use postern_policy::{CounterStore, MemoryCounterStore, RateLimiter, Symbol, SymbolMap};

    use super::*;
    use crate::{
        backends::{MemoryDirectory, MemoryFilterEngine, MemoryOutboundQueue, MemoryStore},
        collaborators::{Autoreply, DirectoryEntry, QuotaUsage, TargetKind, TargetPolicy},
        resolver::RecipientResolver,
        transaction::TransmissionType,
    };

    const IP: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(198, 51, 100, 7));

    struct Fixture {
        directory: Arc<MemoryDirectory>,
        counters: Arc<MemoryCounterStore>,
        store: Arc<MemoryStore>,
        queue: Arc<MemoryOutboundQueue>,
        filters: Arc<MemoryFilterEngine>,
        resolver: RecipientResolver,
        orchestrator: DeliveryOrchestrator,
        config: Arc<GatewayConfig>,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(GatewayConfig::default());
        let directory = Arc::new(MemoryDirectory::new());
        let counters = Arc::new(MemoryCounterStore::new());
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryOutboundQueue::new());
        let filters = Arc::new(MemoryFilterEngine::new());
        let limiter = Arc::new(RateLimiter::new(counters.clone(), config.rate.clone()));
        let resolver = RecipientResolver::new(
            directory.clone(),
            limiter.clone(),
            config.timeouts.clone(),
        );
        let orchestrator = DeliveryOrchestrator::new(
            store.clone(),
            queue.clone(),
            Some(filters.clone()),
            limiter,
        );
        Fixture {
            directory,
            counters,
            store,
            queue,
            filters,
            resolver,
            orchestrator,
            config,
        }
    }

    fn user_entry(owner: &str) -> DirectoryEntry {
        DirectoryEntry {
            kind: TargetKind::User,
            owner_id: owner.to_string(),
            enabled: true,
            policy: TargetPolicy::default(),
            quota: QuotaUsage::default(),
            forward_destinations: Vec::new(),
            autoreply: None,
        }
    }

    fn active_autoreply() -> Autoreply {
        Autoreply {
            start: Utc::now() - TimeDelta::days(1),
            end: Utc::now() + TimeDelta::days(1),
            subject: "Out of office".to_string(),
            text: "Back next week.".to_string(),
            interval_secs: 86_400,
        }
    }

    async fn txn_with(fixture: &Fixture, recipients: &[&str]) -> Transaction {
        let mut txn = Transaction::new(TransmissionType::Esmtp, fixture.config.clone());
        txn.record_sender(Some(
            postern_common::Address::normalize("origin@remote.example").unwrap(),
        ))
        .unwrap();
        for recipient in recipients {
            fixture
                .resolver
                .resolve(recipient, IP, &mut txn)
                .await
                .unwrap();
        }
        txn.capture_data(
            b"To: alice@example.com\r\nSubject: hi\r\n\r\nhello\r\n".to_vec(),
        )
        .unwrap();
        txn
    }

    fn clean_symbols() -> SymbolMap {
        SymbolMap::new()
    }

    #[tokio::test]
    async fn clean_message_is_stored_and_committed() {
        let fixture = fixture();
        fixture.directory.insert("alice@example.com", user_entry("u-alice"));
        let mut txn = txn_with(&fixture, &["alice@example.com"]).await;

        let result = fixture
            .orchestrator
            .run(&mut txn, &clean_symbols())
            .await;
        assert_eq!(result.code, PhaseCode::Ok);

        let stored = fixture.store.messages();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].metadata.folder, "INBOX");

        // Both recipient keys committed exactly once
        assert_eq!(fixture.counters.get("rcpt:u-alice").await.unwrap(), 1);
        assert_eq!(
            fixture
                .counters
                .get(&format!("rcpt_ip:u-alice:{IP}"))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn blacklisted_symbol_rejects_without_committing() {
        let fixture = fixture();
        fixture.directory.insert("alice@example.com", user_entry("u-alice"));
        let mut txn = txn_with(&fixture, &["alice@example.com"]).await;

        let mut symbols = SymbolMap::new();
        symbols.insert("DMARC_POLICY_REJECT".to_string(), Symbol::score(3.0));
        let mut config = GatewayConfig::default();
        config.spam.blacklist = vec!["DMARC_POLICY_REJECT".to_string()];
        // The classify lists live in the transaction's settings
        let mut txn2 = Transaction::new(TransmissionType::Esmtp, Arc::new(config));
        txn2.record_sender(txn.sender().cloned()).unwrap();
        txn2.capture_data(txn.data().unwrap().to_vec()).unwrap();
        std::mem::swap(&mut txn, &mut txn2);

        let result = fixture.orchestrator.run(&mut txn, &symbols).await;
        assert_eq!(result.code, PhaseCode::Deny);
        assert!(result.message.is_some());
        assert_eq!(txn.reject_code(), Some("POLICY_REJECT"));
        assert!(fixture.store.messages().is_empty());
        assert_eq!(fixture.counters.get("rcpt:u-alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejection_template_substitutes_sender_domain() {
        let fixture = fixture();
        let mut config = GatewayConfig::default();
        config.spam.blacklist = vec!["BAD".to_string()];
        config.spam.reject_templates.insert(
            "BAD".to_string(),
            "mail from {host} is not welcome".to_string(),
        );

        let mut txn = Transaction::new(TransmissionType::Esmtp, Arc::new(config));
        txn.record_sender(Some(
            postern_common::Address::normalize("spammer@junk.example").unwrap(),
        ))
        .unwrap();
        txn.capture_data(b"Subject: x\r\n\r\n".to_vec()).unwrap();

        let mut symbols = SymbolMap::new();
        symbols.insert("BAD".to_string(), Symbol::score(5.0));

        let result = fixture.orchestrator.run(&mut txn, &symbols).await;
        assert_eq!(result.code, PhaseCode::Deny);
        assert_eq!(
            result.message.as_deref(),
            Some("mail from junk.example is not welcome")
        );
    }

    #[tokio::test]
    async fn softlisted_symbol_defers() {
        let fixture = fixture();
        let mut config = GatewayConfig::default();
        config.spam.softlist = vec!["GREYLIST".to_string()];
        let mut txn = Transaction::new(TransmissionType::Esmtp, Arc::new(config));
        txn.capture_data(b"Subject: x\r\n\r\n".to_vec()).unwrap();

        let mut symbols = SymbolMap::new();
        symbols.insert("GREYLIST".to_string(), Symbol::score(1.0));

        let result = fixture.orchestrator.run(&mut txn, &symbols).await;
        assert_eq!(result.code, PhaseCode::DenySoft);
        // Deferral never records a permanent reject code
        assert_eq!(txn.reject_code(), None);
    }

    #[tokio::test]
    async fn quota_failure_is_isolated_per_recipient() {
        let fixture = fixture();
        fixture.directory.insert("alice@example.com", user_entry("u-alice"));
        fixture.directory.insert("bob@example.com", user_entry("u-bob"));
        fixture.store.fail_with_quota("u-alice");

        let mut txn =
            txn_with(&fixture, &["alice@example.com", "bob@example.com"]).await;
        let result = fixture
            .orchestrator
            .run(&mut txn, &clean_symbols())
            .await;

        // The transaction still succeeds; only the full mailbox lost out
        assert_eq!(result.code, PhaseCode::Ok);
        let stored = fixture.store.messages();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].recipient_id, "u-bob");

        // Only the delivered recipient's counters move
        assert_eq!(fixture.counters.get("rcpt:u-alice").await.unwrap(), 0);
        assert_eq!(fixture.counters.get("rcpt:u-bob").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn store_outage_defers_but_commits_earned_increments() {
        let fixture = fixture();
        let mut forward = user_entry("f-list");
        forward.kind = TargetKind::Forward;
        forward.forward_destinations = vec!["away@remote.example".to_string()];
        fixture.directory.insert("list@example.com", forward);
        fixture.directory.insert("alice@example.com", user_entry("u-alice"));
        fixture.store.set_outage(true);

        let mut txn =
            txn_with(&fixture, &["list@example.com", "alice@example.com"]).await;
        let result = fixture
            .orchestrator
            .run(&mut txn, &clean_symbols())
            .await;

        assert_eq!(result.code, PhaseCode::DenySoft);
        // The forward went out before the store failed, so its counter
        // reflects the copy that was actually relayed.
        assert_eq!(fixture.queue.queued().len(), 1);
        assert_eq!(fixture.counters.get("fwd:f-list").await.unwrap(), 1);
        // The failed local store must not count
        assert_eq!(fixture.counters.get("rcpt:u-alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn high_spam_score_skips_forwards_but_stores_locally() {
        let fixture = fixture();
        let mut forward = user_entry("f-list");
        forward.kind = TargetKind::Forward;
        forward.forward_destinations = vec!["away@remote.example".to_string()];
        fixture.directory.insert("list@example.com", forward);
        fixture.directory.insert("alice@example.com", user_entry("u-alice"));

        let mut txn =
            txn_with(&fixture, &["list@example.com", "alice@example.com"]).await;
        let mut symbols = SymbolMap::new();
        // Above forward_skip (10.0) but below nothing else
        symbols.insert("SPAMMY".to_string(), Symbol::score(11.0));

        let result = fixture.orchestrator.run(&mut txn, &symbols).await;
        assert_eq!(result.code, PhaseCode::Ok);
        assert!(fixture.queue.queued().is_empty());
        // Routed to the spam folder: 11.0 >= spam_folder_score (8.0)
        let stored = fixture.store.messages();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].metadata.folder, "Junk");
        assert_eq!(fixture.counters.get("fwd:f-list").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn forward_failure_does_not_block_other_destinations() {
        let fixture = fixture();
        let mut forward = user_entry("f-list");
        forward.kind = TargetKind::Forward;
        forward.forward_destinations = vec![
            "first@remote.example".to_string(),
            "second@remote.example".to_string(),
        ];
        fixture.directory.insert("list@example.com", forward);
        fixture.queue.fail_for("first@remote.example");

        let mut txn = txn_with(&fixture, &["list@example.com"]).await;
        let result = fixture
            .orchestrator
            .run(&mut txn, &clean_symbols())
            .await;

        assert_eq!(result.code, PhaseCode::Ok);
        let queued = fixture.queue.queued();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].envelope_to, "second@remote.example");
        // Only the relayed copy counts
        assert_eq!(fixture.counters.get("fwd:f-list").await.unwrap(), 1);
        assert_eq!(txn.targets().forward_counters()["fwd:f-list"], 1);
    }

    #[tokio::test]
    async fn active_autoreply_goes_to_visible_recipient_once() {
        let fixture = fixture();
        let mut entry = user_entry("u-alice");
        entry.autoreply = Some(active_autoreply());
        fixture.directory.insert("alice@example.com", entry);

        let mut txn = txn_with(&fixture, &["alice@example.com"]).await;
        let result = fixture
            .orchestrator
            .run(&mut txn, &clean_symbols())
            .await;
        assert_eq!(result.code, PhaseCode::Ok);

        let queued = fixture.queue.queued();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].envelope_from, "");
        assert_eq!(queued[0].envelope_to, "origin@remote.example");
        let body = String::from_utf8(queued[0].raw.clone()).unwrap();
        assert!(body.contains("Auto-Submitted: auto-replied"));
        assert!(body.contains("Subject: Out of office"));

        // The interval counter committed, so a second message within the
        // window stays quiet.
        assert_eq!(
            fixture
                .counters
                .get("autoreply:alice@example.com")
                .await
                .unwrap(),
            1
        );
        let mut second = txn_with(&fixture, &["alice@example.com"]).await;
        fixture
            .orchestrator
            .run(&mut second, &clean_symbols())
            .await;
        assert_eq!(fixture.queue.queued().len(), 1, "no second reply");
    }

    #[tokio::test]
    async fn bcc_style_delivery_sends_no_autoreply() {
        let fixture = fixture();
        let mut entry = user_entry("u-bob");
        entry.autoreply = Some(active_autoreply());
        fixture.directory.insert("bob@example.com", entry);

        // Headers name alice, not bob
        let mut txn = txn_with(&fixture, &["bob@example.com"]).await;
        let result = fixture
            .orchestrator
            .run(&mut txn, &clean_symbols())
            .await;
        assert_eq!(result.code, PhaseCode::Ok);
        assert!(fixture.queue.queued().is_empty());
    }

    #[tokio::test]
    async fn null_sender_suppresses_autoreply() {
        let fixture = fixture();
        let mut entry = user_entry("u-alice");
        entry.autoreply = Some(active_autoreply());
        fixture.directory.insert("alice@example.com", entry);

        let mut txn = Transaction::new(TransmissionType::Esmtp, fixture.config.clone());
        txn.record_sender(None).unwrap();
        fixture
            .resolver
            .resolve("alice@example.com", IP, &mut txn)
            .await
            .unwrap();
        txn.capture_data(b"To: alice@example.com\r\n\r\nbounce\r\n".to_vec())
            .unwrap();

        let result = fixture
            .orchestrator
            .run(&mut txn, &clean_symbols())
            .await;
        assert_eq!(result.code, PhaseCode::Ok);
        assert!(fixture.queue.queued().is_empty());
    }

    #[tokio::test]
    async fn filter_discard_skips_store_for_that_recipient() {
        let fixture = fixture();
        fixture.directory.insert("alice@example.com", user_entry("u-alice"));
        fixture.filters.set_action(
            "u-alice",
            FilterAction {
                folder: None,
                discard: true,
            },
        );

        let mut txn = txn_with(&fixture, &["alice@example.com"]).await;
        let result = fixture
            .orchestrator
            .run(&mut txn, &clean_symbols())
            .await;
        assert_eq!(result.code, PhaseCode::Ok);
        assert!(fixture.store.messages().is_empty());
        // A discarded delivery still happened from the sender's side
        assert_eq!(fixture.counters.get("rcpt:u-alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn filter_folder_override_wins_over_score_routing() {
        let fixture = fixture();
        fixture.directory.insert("alice@example.com", user_entry("u-alice"));
        fixture.filters.set_action(
            "u-alice",
            FilterAction {
                folder: Some("Receipts".to_string()),
                discard: false,
            },
        );

        let mut txn = txn_with(&fixture, &["alice@example.com"]).await;
        let result = fixture
            .orchestrator
            .run(&mut txn, &clean_symbols())
            .await;
        assert_eq!(result.code, PhaseCode::Ok);
        assert_eq!(fixture.store.messages()[0].metadata.folder, "Receipts");
    }
}
