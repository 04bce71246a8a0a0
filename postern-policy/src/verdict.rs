//! Authentication and spam verdict aggregation
//!
//! The gateway never runs SPF/DKIM/ARC/DMARC/BIMI checks or spam scoring
//! itself; it consumes externally computed results. This module gives those
//! results one canonical shape per transaction: each protocol verdict is
//! written at most once, and spam-engine symbols are resolved into
//! `{score, description}` at ingestion so nothing downstream branches on
//! the wire shape.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The authentication protocols whose verdicts the gateway records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Spf,
    Dkim,
    Arc,
    Dmarc,
    Bimi,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Spf => "SPF",
            Self::Dkim => "DKIM",
            Self::Arc => "ARC",
            Self::Dmarc => "DMARC",
            Self::Bimi => "BIMI",
        };
        f.write_str(name)
    }
}

/// Outcome of one authentication check, per RFC 8601 vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Pass,
    Fail,
    SoftFail,
    Neutral,
    None,
    TempError,
    PermError,
}

/// One recorded verdict: status plus free-form detail (domain, selector,
/// policy, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    #[serde(default)]
    pub detail: AHashMap<String, String>,
}

impl Verdict {
    #[must_use]
    pub fn new(status: VerdictStatus) -> Self {
        Self {
            status,
            detail: AHashMap::new(),
        }
    }

    /// Attach a detail entry, builder-style.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }

    /// The domain the check was evaluated against, when recorded.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.detail.get("domain").map(String::as_str)
    }
}

/// Attempt to overwrite an already-recorded verdict.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0} verdict already recorded")]
pub struct VerdictError(pub Protocol);

/// Per-transaction verdict record. Each slot is written at most once;
/// the SPF slot during MAIL, the rest during DATA.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthVerdicts {
    spf: Option<Verdict>,
    dkim: Option<Verdict>,
    arc: Option<Verdict>,
    dmarc: Option<Verdict>,
    bimi: Option<Verdict>,
}

impl AuthVerdicts {
    /// Record a verdict for `protocol`. A second write for the same
    /// protocol is an error; the stored verdict is never replaced.
    pub fn record(&mut self, protocol: Protocol, verdict: Verdict) -> Result<(), VerdictError> {
        let slot = match protocol {
            Protocol::Spf => &mut self.spf,
            Protocol::Dkim => &mut self.dkim,
            Protocol::Arc => &mut self.arc,
            Protocol::Dmarc => &mut self.dmarc,
            Protocol::Bimi => &mut self.bimi,
        };

        if slot.is_some() {
            return Err(VerdictError(protocol));
        }
        *slot = Some(verdict);
        Ok(())
    }

    #[must_use]
    pub const fn spf(&self) -> Option<&Verdict> {
        self.spf.as_ref()
    }

    #[must_use]
    pub const fn dkim(&self) -> Option<&Verdict> {
        self.dkim.as_ref()
    }

    #[must_use]
    pub const fn arc(&self) -> Option<&Verdict> {
        self.arc.as_ref()
    }

    #[must_use]
    pub const fn dmarc(&self) -> Option<&Verdict> {
        self.dmarc.as_ref()
    }

    #[must_use]
    pub const fn bimi(&self) -> Option<&Verdict> {
        self.bimi.as_ref()
    }
}

/// Wire shape of one spam-engine symbol: engines report either a bare
/// score or a `{score, description}` object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawSymbol {
    Score(f64),
    Detailed {
        score: f64,
        #[serde(default)]
        description: Option<String>,
    },
}

/// Canonical symbol shape, resolved once at ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub score: f64,
    pub description: Option<String>,
}

impl Symbol {
    #[must_use]
    pub const fn score(score: f64) -> Self {
        Self {
            score,
            description: None,
        }
    }
}

impl From<RawSymbol> for Symbol {
    fn from(raw: RawSymbol) -> Self {
        match raw {
            RawSymbol::Score(score) => Self {
                score,
                description: None,
            },
            RawSymbol::Detailed { score, description } => Self { score, description },
        }
    }
}

/// Symbol name → canonical symbol, one map per transaction.
pub type SymbolMap = AHashMap<String, Symbol>;

/// Resolve a raw symbol map into the canonical shape.
#[must_use]
pub fn ingest_symbols(raw: AHashMap<String, RawSymbol>) -> SymbolMap {
    raw.into_iter()
        .map(|(name, symbol)| (name, Symbol::from(symbol)))
        .collect()
}

/// Sum of all symbol scores, the transaction's aggregate spam score.
#[must_use]
pub fn total_score(symbols: &SymbolMap) -> f64 {
    symbols.values().map(|symbol| symbol.score).sum()
}

/// Decision from spam-symbol classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpamAction {
    Accept,
    Reject { symbol: String },
    Defer { symbol: String },
}

/// Classify a transaction's symbols against the configured lists.
///
/// The blacklist is scanned first, in list order, so a symbol on both
/// lists rejects, and ties between matched symbols break deterministically
/// on list position rather than map iteration order. A symbol whose score
/// is exactly zero never matches.
#[must_use]
pub fn classify(symbols: &SymbolMap, blacklist: &[String], softlist: &[String]) -> SpamAction {
    let matched = |name: &String| symbols.get(name).is_some_and(|symbol| symbol.score != 0.0);

    if let Some(symbol) = blacklist.iter().find(|name| matched(name)) {
        return SpamAction::Reject {
            symbol: symbol.clone(),
        };
    }

    if let Some(symbol) = softlist.iter().find(|name| matched(name)) {
        return SpamAction::Defer {
            symbol: symbol.clone(),
        };
    }

    SpamAction::Accept
}

/// Fallback text when no template is configured for the matched symbol.
const DEFAULT_REJECTION: &str =
    "This message was identified as unsolicited mail and has been rejected";

/// Build the rejection message for a matched symbol.
///
/// A configured template has its literal `{host}` occurrences replaced by
/// the sender's domain; without a template the fixed default applies.
#[must_use]
pub fn rejection_message(
    symbol: &str,
    sender_domain: &str,
    templates: &AHashMap<String, String>,
) -> String {
    templates.get(symbol).map_or_else(
        || DEFAULT_REJECTION.to_string(),
        |template| template.replace("{host}", sender_domain),
    )
}
