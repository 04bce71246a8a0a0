//! Domain newtype for type safety
//!
//! Wraps domain strings to prevent accidentally passing full email addresses
//! or other strings where a bare domain is expected.

use std::{
    fmt::{self, Display},
    ops::Deref,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

/// A domain name string wrapper
///
/// The `#[repr(transparent)]` attribute ensures this is a zero-cost
/// abstraction at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Domain(Arc<str>);

impl Domain {
    /// Create a new `Domain` from any type that can be converted to `Arc<str>`
    #[must_use]
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    /// Get the domain as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the domain into the inner `Arc<str>`
    #[must_use]
    pub fn into_inner(self) -> Arc<str> {
        self.0
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for Domain {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<String> for Domain {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&str> for Domain {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_creation() {
        let domain = Domain::new("example.com");
        assert_eq!(domain.as_str(), "example.com");
    }

    #[test]
    fn test_domain_equality() {
        assert_eq!(Domain::new("example.com"), Domain::from("example.com"));
        assert_ne!(Domain::new("example.com"), Domain::new("example.org"));
    }

    #[test]
    fn test_domain_display() {
        assert_eq!(format!("{}", Domain::new("mail.example.com")), "mail.example.com");
    }

    #[test]
    fn test_domain_hash() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        map.insert(Domain::new("example.com"), 42);
        assert_eq!(map.get(&Domain::new("example.com")), Some(&42));
    }
}
