//! Error types shared by the routing core and its capability adapters.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::ollama::OllamaError;

/// Failure of one external capability (classifier, embedder, knowledge base,
/// web search, generator or feedback store).
///
/// The orchestrator absorbs these: a failed capability means "no candidate
/// from this source" and routing continues with the next stage.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The call did not finish within the configured per-call timeout
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Transport-level failure reaching a remote provider
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The provider answered with a non-success status
    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    /// The provider answered but the payload could not be used
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Local model server failure
    #[error(transparent)]
    Ollama(#[from] OllamaError),

    /// SQLite or other local storage failure
    #[error("storage error: {0}")]
    Storage(String),

    /// The capability is not configured (missing API key, disabled provider)
    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl From<rusqlite::Error> for CapabilityError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for CapabilityError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }
}

/// Invalid configuration, detected before any query is served.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A threshold or penalty fell outside [0, 1]
    #[error("{name} must be within [0, 1], got {value}")]
    OutOfRange { name: &'static str, value: f64 },

    /// A count or duration that must be positive was zero
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    /// An enumerated setting had an unknown value
    #[error("unknown {name}: {value}")]
    UnknownValue { name: &'static str, value: String },

    /// An environment override could not be parsed
    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },

    /// The configuration file could not be read
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required component was not supplied to a builder
    #[error("missing component: {0}")]
    MissingComponent(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn timeout_display_includes_millis() {
        let err = CapabilityError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "timed out after 1500ms");
    }

    #[test]
    fn ollama_errors_convert_transparently() {
        let err: CapabilityError = OllamaError::Api {
            message: "model not found".to_string(),
        }
        .into();
        assert!(err.to_string().contains("model not found"));
    }

    #[test]
    fn out_of_range_names_the_setting() {
        let err = ConfigError::OutOfRange {
            name: "kb_threshold",
            value: 1.5,
        };
        assert_eq!(err.to_string(), "kb_threshold must be within [0, 1], got 1.5");
    }

    #[test]
    fn parse_error_keeps_source() {
        let toml_err = toml::from_str::<toml::Value>("= nope").unwrap_err();
        let err = ConfigError::Parse(toml_err);
        assert!(err.source().is_some());
    }
}
