//! Envelope-address parsing and canonicalization.
//!
//! Every address entering the gateway is normalized exactly once, at the
//! protocol boundary, into the canonical `local@domain` form used for
//! directory lookups and rate-limit keys:
//!
//! - the domain is folded to its lowercase ASCII-compatible (punycode) form,
//! - the local part keeps its case, except for SRS bounce addresses where
//!   the `SRS0=`/`SRS1=` prefix is forced to exact upper case (bounce
//!   validation downstream is case-sensitive),
//! - normalization is idempotent and never fails for a parseable address.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Domain;

/// Errors raised when an address cannot be parsed at all.
///
/// Note that normalization itself is total: once an address parses, every
/// canonicalization step has a fallback.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The input was empty or whitespace-only.
    #[error("empty address")]
    Empty,

    /// The input has no `@domain` part.
    #[error("address has no domain: {0}")]
    MissingDomain(String),

    /// The input has no local part before the `@`.
    #[error("address has no local part: {0}")]
    MissingLocalPart(String),
}

/// A normalized envelope address.
///
/// Construction via [`Address::normalize`] guarantees the canonical form
/// described in the module docs. `Display` renders `local@domain`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    local_part: String,
    domain: Domain,
}

impl Address {
    /// Parse and canonicalize a raw envelope address.
    ///
    /// Accepts an optional single layer of angle brackets (`<user@host>`).
    /// Idempotent: normalizing an already-normalized address yields the
    /// same value.
    pub fn normalize(raw: &str) -> Result<Self, AddressError> {
        let trimmed = raw.trim();
        let trimmed = trimmed
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .unwrap_or(trimmed)
            .trim();

        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }

        // Split at the last '@' so quoted local parts containing '@' survive.
        let (local, domain) = trimmed
            .rsplit_once('@')
            .ok_or_else(|| AddressError::MissingDomain(trimmed.to_string()))?;

        if local.is_empty() {
            return Err(AddressError::MissingLocalPart(trimmed.to_string()));
        }
        if domain.is_empty() {
            return Err(AddressError::MissingDomain(trimmed.to_string()));
        }

        Ok(Self {
            local_part: repair_srs_prefix(local),
            domain: Domain::from(canonical_domain(domain)),
        })
    }

    /// The local part, case preserved (SRS prefix excepted).
    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    /// The canonical (lowercase, punycode) domain.
    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// The Unicode display form of the domain.
    ///
    /// The canonical form stays ASCII; this is for human-facing output only.
    #[must_use]
    pub fn unicode_domain(&self) -> String {
        idna::domain_to_unicode(self.domain.as_str()).0
    }

    /// Whether the address carries a wildcard marker.
    ///
    /// Wildcards are directory patterns, never deliverable recipients.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.local_part.contains('*') || self.domain.contains('*')
    }

    /// Whether the local part is an SRS bounce rewrite.
    #[must_use]
    pub fn is_srs(&self) -> bool {
        self.local_part.starts_with("SRS0=") || self.local_part.starts_with("SRS1=")
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

/// Fold a domain to its lowercase ASCII-compatible encoding.
///
/// Falls back to plain ASCII lowercasing when the IDNA mapping rejects the
/// input, keeping normalization total.
fn canonical_domain(domain: &str) -> String {
    idna::domain_to_ascii(domain).unwrap_or_else(|_| domain.to_ascii_lowercase())
}

/// Force an exact-case `SRS0=`/`SRS1=` prefix, leaving the rest of the
/// local part untouched.
fn repair_srs_prefix(local: &str) -> String {
    let lower = local.get(..5).map(str::to_ascii_lowercase);
    match lower.as_deref() {
        Some("srs0=") => format!("SRS0={}", &local[5..]),
        Some("srs1=") => format!("SRS1={}", &local[5..]),
        _ => local.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_domain_only() {
        let addr = Address::normalize("John.Doe@EXAMPLE.Com").unwrap();
        assert_eq!(addr.to_string(), "John.Doe@example.com");
        assert_eq!(addr.local_part(), "John.Doe");
    }

    #[test]
    fn normalize_strips_angle_brackets() {
        let addr = Address::normalize("<user@example.com>").unwrap();
        assert_eq!(addr.to_string(), "user@example.com");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in [
            "User@EXAMPLE.com",
            "srs0=abcd=12=ab=user@example.com",
            "plain@bücher.example",
        ] {
            let once = Address::normalize(raw).unwrap();
            let twice = Address::normalize(&once.to_string()).unwrap();
            assert_eq!(once, twice, "not idempotent for {raw}");
        }
    }

    #[test]
    fn srs_prefix_forced_to_upper_case() {
        let addr = Address::normalize("srs0=abcd=12=ab=user@example.com").unwrap();
        assert!(addr.local_part().starts_with("SRS0="));
        assert_eq!(addr.local_part(), "SRS0=abcd=12=ab=user");
        assert!(addr.is_srs());

        let mixed = Address::normalize("SrS1=xyz=user@example.com").unwrap();
        assert!(mixed.local_part().starts_with("SRS1="));
    }

    #[test]
    fn srs_rest_of_local_part_case_preserved() {
        let addr = Address::normalize("sRs0=HH=AA=User@example.com").unwrap();
        assert_eq!(addr.local_part(), "SRS0=HH=AA=User");
    }

    #[test]
    fn idn_domain_becomes_punycode() {
        let addr = Address::normalize("post@bücher.example").unwrap();
        assert_eq!(addr.domain().as_str(), "xn--bcher-kva.example");
        assert_eq!(addr.unicode_domain(), "bücher.example");
    }

    #[test]
    fn wildcard_detection() {
        assert!(Address::normalize("*@example.com").unwrap().is_wildcard());
        assert!(Address::normalize("user@*.example.com").unwrap().is_wildcard());
        assert!(!Address::normalize("user@example.com").unwrap().is_wildcard());
    }

    #[test]
    fn parse_failures() {
        assert_eq!(Address::normalize("  "), Err(AddressError::Empty));
        assert!(matches!(
            Address::normalize("no-domain"),
            Err(AddressError::MissingDomain(_))
        ));
        assert!(matches!(
            Address::normalize("@example.com"),
            Err(AddressError::MissingLocalPart(_))
        ));
        assert!(matches!(
            Address::normalize("user@"),
            Err(AddressError::MissingDomain(_))
        ));
    }
}
