//! The protocol-phase facade.

use std::{net::IpAddr, sync::Arc};

use postern_common::{Address, audit, config::GatewayConfig};
use postern_delivery::{
    DeliveryOrchestrator, Directory, FilterEngine, GatewayError, MessageStore, Outcome,
    OutboundQueue, QueueResult, RecipientResolver, SystemError, Transaction, TransmissionType,
};
use postern_policy::{CounterStore, Protocol, RateLimiter, SymbolMap, Verdict};

/// The injected backends the gateway decides against.
#[derive(Debug)]
pub struct Collaborators {
    pub directory: Arc<dyn Directory>,
    pub store: Arc<dyn MessageStore>,
    pub queue: Arc<dyn OutboundQueue>,
    /// Per-recipient filter rules; `None` disables filter evaluation.
    pub filters: Option<Arc<dyn FilterEngine>>,
    pub counters: Arc<dyn CounterStore>,
}

/// Authentication verdicts computed over the message body, handed in at
/// DATA. Absent checks simply stay unset on the transaction.
#[derive(Debug, Default)]
pub struct DataVerdicts {
    pub dkim: Option<Verdict>,
    pub arc: Option<Verdict>,
    pub dmarc: Option<Verdict>,
    pub bimi: Option<Verdict>,
}

/// One gateway instance serves every connection; per-message state lives
/// in the [`Transaction`] the caller threads through the phases.
#[derive(Debug)]
pub struct Gateway {
    settings: Arc<GatewayConfig>,
    resolver: RecipientResolver,
    orchestrator: DeliveryOrchestrator,
}

impl Gateway {
    #[must_use]
    pub fn new(config: GatewayConfig, collaborators: Collaborators) -> Self {
        audit::init(config.audit.clone());
        let settings = Arc::new(config);
        let limiter = Arc::new(RateLimiter::new(
            collaborators.counters,
            settings.rate.clone(),
        ));
        let resolver = RecipientResolver::new(
            collaborators.directory,
            limiter.clone(),
            settings.timeouts.clone(),
        );
        let orchestrator = DeliveryOrchestrator::new(
            collaborators.store,
            collaborators.queue,
            collaborators.filters,
            limiter,
        );
        Self {
            settings,
            resolver,
            orchestrator,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &GatewayConfig {
        &self.settings
    }

    /// Open a transaction when MAIL FROM arrives.
    #[must_use]
    pub fn begin(&self, extended: bool, tls: bool) -> Transaction {
        Transaction::new(
            TransmissionType::derive(extended, tls),
            self.settings.clone(),
        )
    }

    /// MAIL FROM: record the (possibly null) sender and the SPF verdict.
    ///
    /// An empty or `<>` argument is the null sender used by bounces; it is
    /// accepted and recorded as absent.
    pub fn mail_from(
        &self,
        txn: &mut Transaction,
        raw: &str,
        spf: Option<Verdict>,
    ) -> Outcome {
        match Self::mail_from_inner(txn, raw, spf) {
            Ok(()) => Outcome::Accept,
            Err(error) => error.into(),
        }
    }

    fn mail_from_inner(
        txn: &mut Transaction,
        raw: &str,
        spf: Option<Verdict>,
    ) -> Result<(), GatewayError> {
        let trimmed = raw.trim();
        let sender = if trimmed.is_empty() || trimmed == "<>" {
            None
        } else {
            Some(Address::normalize(trimmed)?)
        };
        txn.record_sender(sender).map_err(SystemError::from)?;

        if let Some(verdict) = spf {
            txn.verdicts_mut()
                .record(Protocol::Spf, verdict)
                .map_err(|error| SystemError::Internal(error.to_string()))?;
        }
        Ok(())
    }

    /// RCPT TO: resolve and stage one recipient.
    pub async fn rcpt_to(&self, txn: &mut Transaction, raw: &str, client_ip: IpAddr) -> Outcome {
        match self.resolver.resolve(raw, client_ip, txn).await {
            Ok(()) => Outcome::Accept,
            Err(error) => error.into(),
        }
    }

    /// DATA: capture the message body and record the body-derived
    /// authentication verdicts.
    pub fn data(&self, txn: &mut Transaction, raw: Vec<u8>, verdicts: DataVerdicts) -> Outcome {
        match Self::data_inner(txn, raw, verdicts) {
            Ok(()) => Outcome::Accept,
            Err(error) => error.into(),
        }
    }

    fn data_inner(
        txn: &mut Transaction,
        raw: Vec<u8>,
        verdicts: DataVerdicts,
    ) -> Result<(), GatewayError> {
        txn.validate().map_err(SystemError::from)?;
        txn.capture_data(raw).map_err(SystemError::from)?;

        let slots = [
            (Protocol::Dkim, verdicts.dkim),
            (Protocol::Arc, verdicts.arc),
            (Protocol::Dmarc, verdicts.dmarc),
            (Protocol::Bimi, verdicts.bimi),
        ];
        for (protocol, verdict) in slots {
            if let Some(verdict) = verdict {
                txn.verdicts_mut()
                    .record(protocol, verdict)
                    .map_err(|error| SystemError::Internal(error.to_string()))?;
            }
        }
        Ok(())
    }

    /// QUEUE: run the delivery pipeline and produce the final reply.
    pub async fn queue(&self, txn: &mut Transaction, symbols: &SymbolMap) -> QueueResult {
        self.orchestrator.run(txn, symbols).await
    }
}
