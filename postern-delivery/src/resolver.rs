//! RCPT-phase recipient resolution.
//!
//! Each RCPT TO is an independent call: normalize, classify through the
//! directory, enforce per-target policy, then stage the result into the
//! transaction. The steps are strictly ordered and short-circuit on the
//! first failure, and a failed call leaves the transaction untouched —
//! every check runs before the first mutation.

use std::{net::IpAddr, sync::Arc};

use tokio::time::timeout;
use tracing::instrument;

use postern_common::{Address, audit, config::TimeoutConfig};
use postern_policy::{RateDecision, RateKey, RateLimiter, Selector};

use crate::{
    collaborators::{Directory, DirectoryEntry, DirectoryError, TargetKind},
    error::{GatewayError, PermanentError, SystemError, TemporaryError},
    transaction::{ResolvedTarget, Transaction},
};

/// Resolves recipient addresses against the directory and enforces
/// per-target policy.
#[derive(Debug)]
pub struct RecipientResolver {
    directory: Arc<dyn Directory>,
    limiter: Arc<RateLimiter>,
    timeouts: TimeoutConfig,
}

impl RecipientResolver {
    #[must_use]
    pub fn new(
        directory: Arc<dyn Directory>,
        limiter: Arc<RateLimiter>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            directory,
            limiter,
            timeouts,
        }
    }

    /// Resolve one RCPT TO address into the transaction.
    ///
    /// On success the transaction gains a resolved target, its uncommitted
    /// rate keys and a recipient-set entry. On failure nothing is staged;
    /// permanent failures additionally record the transaction's reject
    /// code (first rejection wins).
    #[instrument(level = "debug", skip(self, txn), fields(transaction_id = %txn.id()))]
    pub async fn resolve(
        &self,
        raw: &str,
        client_ip: IpAddr,
        txn: &mut Transaction,
    ) -> Result<(), GatewayError> {
        match self.resolve_inner(raw, client_ip, txn).await {
            Ok(kind) => {
                audit::log_recipient_accepted(&txn.id().to_string(), raw, kind.as_str());
                Ok(())
            }
            Err(error) => {
                if error.is_permanent() {
                    txn.record_reject(error.code());
                }
                audit::log_recipient_rejected(
                    &txn.id().to_string(),
                    raw,
                    error.code(),
                    error.is_permanent(),
                );
                Err(error)
            }
        }
    }

    async fn resolve_inner(
        &self,
        raw: &str,
        client_ip: IpAddr,
        txn: &mut Transaction,
    ) -> Result<TargetKind, GatewayError> {
        let address = Address::normalize(raw)?;

        if address.is_wildcard() {
            return Err(PermanentError::WildcardRecipient(address.to_string()).into());
        }

        let entry = self.lookup(&address).await?;
        let Some(entry) = entry else {
            return Err(PermanentError::NoSuchUser(address.to_string()).into());
        };

        match entry.kind {
            TargetKind::User => self.resolve_user(address, entry, client_ip, txn).await,
            TargetKind::Forward => self.resolve_forward(address, entry, txn).await,
        }
    }

    async fn lookup(&self, address: &Address) -> Result<Option<DirectoryEntry>, GatewayError> {
        timeout(self.timeouts.lookup(), self.directory.resolve_address(address))
            .await
            .map_err(|_| TemporaryError::Timeout("directory"))?
            .map_err(|DirectoryError::Unavailable(message)| {
                TemporaryError::DirectoryUnavailable(message).into()
            })
    }

    async fn resolve_user(
        &self,
        address: Address,
        entry: DirectoryEntry,
        client_ip: IpAddr,
        txn: &mut Transaction,
    ) -> Result<TargetKind, GatewayError> {
        if !entry.enabled {
            return Err(PermanentError::MailboxDisabled(address.to_string()).into());
        }
        if entry.quota.is_full() {
            return Err(PermanentError::MailboxFull(address.to_string()).into());
        }

        let config = self.limiter.config();
        let window = config.rcpt_window();
        let max = entry.policy.max_recipients.unwrap_or(config.default_rcpt_max);

        let keys = vec![
            RateKey::new(Selector::Rcpt, entry.owner_id.clone(), window),
            RateKey::new(
                Selector::RcptIp,
                format!("{}:{client_ip}", entry.owner_id),
                window,
            ),
        ];
        for key in &keys {
            self.enforce(key, max).await?;
        }

        let target = ResolvedTarget {
            kind: TargetKind::User,
            owner_id: entry.owner_id,
            address,
            policy: entry.policy,
            rate_keys: keys,
            forward_destinations: Vec::new(),
        };
        txn.stage_target(target, entry.autoreply)
            .map_err(SystemError::from)?;

        Ok(TargetKind::User)
    }

    async fn resolve_forward(
        &self,
        address: Address,
        entry: DirectoryEntry,
        txn: &mut Transaction,
    ) -> Result<TargetKind, GatewayError> {
        let config = self.limiter.config();
        let window = config.forward_window();
        let max = entry.policy.max_forwards.unwrap_or(config.default_forward_max);

        let key = RateKey::new(Selector::Forward, entry.owner_id.clone(), window);
        self.enforce(&key, max).await?;

        let target = ResolvedTarget {
            kind: TargetKind::Forward,
            owner_id: entry.owner_id,
            address,
            policy: entry.policy,
            rate_keys: vec![key],
            forward_destinations: entry.forward_destinations,
        };
        txn.stage_target(target, None).map_err(SystemError::from)?;

        Ok(TargetKind::Forward)
    }

    /// Run one non-mutating rate check, mapping a hit limit to a deferral
    /// whose retry-after equals the counter window.
    async fn enforce(&self, key: &RateKey, max: u64) -> Result<(), GatewayError> {
        match self.limiter.check(key, max).await? {
            RateDecision::Allowed => Ok(()),
            RateDecision::Limited { retry_after } => Err(TemporaryError::RateLimited {
                selector: key.selector,
                retry_after,
            }
            .into()),
        }
    }
}
