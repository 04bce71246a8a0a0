//! Configuration loading.
//!
//! The gateway reads one RON file; every field has a default, so an
//! empty `()` document yields a fully working configuration.

use std::path::Path;

use thiserror::Error;

use postern_common::config::GatewayConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Parse(#[from] ron::error::SpannedError),
}

/// Load and parse a gateway configuration file.
pub fn load(path: impl AsRef<Path>) -> Result<GatewayConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(ron::from_str(&raw)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("postern-{}-{name}", std::process::id()))
    }

    #[test]
    fn loads_a_partial_file() {
        let path = temp_path("partial.ron");
        std::fs::write(
            &path,
            r#"(
                rate: (
                    default_rcpt_max: 5,
                ),
                spam: (
                    blacklist: ["DMARC_POLICY_REJECT"],
                ),
            )"#,
        )
        .unwrap();

        let config = load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.rate.default_rcpt_max, 5);
        assert_eq!(config.spam.blacklist, vec!["DMARC_POLICY_REJECT"]);
        // Untouched sections keep their defaults
        assert_eq!(config.timeouts.lookup_secs, 8);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let error = load(temp_path("does-not-exist.ron")).unwrap_err();
        assert!(matches!(error, ConfigError::Io(_)));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let path = temp_path("broken.ron");
        std::fs::write(&path, "(rate: (default_rcpt_max: \"five\"))").unwrap();

        let error = load(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(error, ConfigError::Parse(_)));
    }
}
