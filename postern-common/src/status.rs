use core::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Terminal code for a protocol phase.
///
/// `Ok` accepts, `Deny` is a permanent rejection (5xx to the client),
/// `DenySoft` a temporary one (4xx, the client may retry later).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum PhaseCode {
    Ok,
    Deny,
    DenySoft,
}

impl PhaseCode {
    /// The SMTP status code this phase code maps to.
    #[must_use]
    pub const fn smtp_code(self) -> u32 {
        match self {
            Self::Ok => 250,
            Self::Deny => 550,
            Self::DenySoft => 450,
        }
    }

    /// Checks if the code is a permanent rejection
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.smtp_code() >= 500
    }

    /// Checks if the code is a temporary rejection
    #[must_use]
    pub const fn is_temporary(self) -> bool {
        self.smtp_code() >= 400 && self.smtp_code() < 500
    }
}

impl Display for PhaseCode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        let tag = match self {
            Self::Ok => "OK",
            Self::Deny => "DENY",
            Self::DenySoft => "DENYSOFT",
        };
        write!(fmt, "{tag}")
    }
}

#[cfg(test)]
mod test {
    use super::PhaseCode;

    #[test]
    fn phase_code() {
        assert!(PhaseCode::Deny.is_permanent());
        assert!(!PhaseCode::Deny.is_temporary());

        assert!(PhaseCode::DenySoft.is_temporary());
        assert!(!PhaseCode::DenySoft.is_permanent());

        assert!(!PhaseCode::Ok.is_permanent());
        assert!(!PhaseCode::Ok.is_temporary());

        assert_eq!(PhaseCode::Ok.smtp_code(), 250);
        assert_eq!(PhaseCode::Deny.to_string(), "DENY");
    }
}
