//! Error types for Hermes operations

use serde::{Deserialize, Serialize};

use crate::provider::ProviderError;

/// Result type for Hermes operations
pub type Result<T> = std::result::Result<T, HermesError>;

/// Classification attached to every item that did not produce an embedding.
///
/// Drives whether the pipeline retries, aborts the run, or marks the item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Provider throttling that survived every retry
    RateLimited,
    /// The account or key has no remaining allowance
    QuotaExhausted,
    /// Network, timeout or server-side failure
    TransportError,
    /// The provider (or pre-flight validation) rejected the input
    ValidationError,
    /// The run was cancelled before the item was attempted
    Cancelled,
}

impl ErrorKind {
    /// Whether a batch failing with this kind is worth re-issuing
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::TransportError)
    }

    /// Stable snake_case name, used in logs and CLI output
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::QuotaExhausted => "quota_exhausted",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for the Hermes pipeline
#[derive(Debug, thiserror::Error)]
pub enum HermesError {
    /// No usable configuration for a service, or invalid settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A provider that needs a secret has none in the credential store
    #[error("API key not configured for provider: {provider}")]
    CredentialMissing {
        /// Canonical provider name
        provider: String,
    },

    /// The provider is not present in the catalog
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// A single-item embedding failed; `kind` mirrors the batch classification
    #[error("Embedding failed ({kind}): {message}")]
    Embedding {
        /// Failure classification
        kind: ErrorKind,
        /// Underlying provider message
        message: String,
        /// Leading characters of the offending text
        text_preview: String,
    },

    /// Provider call failed after the retry policy gave up
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The operation was cancelled before it started
    #[error("Operation cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl HermesError {
    /// Failure kind for errors that carry one
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            HermesError::Embedding { kind, .. } => Some(*kind),
            HermesError::Provider(e) => Some(e.kind()),
            HermesError::Cancelled => Some(ErrorKind::Cancelled),
            _ => None,
        }
    }

    /// Configuration and credential errors are raised before any network activity
    pub fn is_fatal_setup(&self) -> bool {
        matches!(
            self,
            HermesError::Configuration(_)
                | HermesError::CredentialMissing { .. }
                | HermesError::UnknownProvider(_)
        )
    }
}

impl From<String> for HermesError {
    fn from(s: String) -> Self {
        HermesError::Other(s)
    }
}

impl From<&str> for HermesError {
    fn from(s: &str) -> Self {
        HermesError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for HermesError {
    fn from(err: anyhow::Error) -> Self {
        HermesError::Other(err.to_string())
    }
}

impl From<figment::Error> for HermesError {
    fn from(err: figment::Error) -> Self {
        HermesError::Configuration(format!("Failed to load configuration: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_retryable() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::TransportError.is_retryable());
        assert!(!ErrorKind::QuotaExhausted.is_retryable());
        assert!(!ErrorKind::ValidationError.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::QuotaExhausted).unwrap();
        assert_eq!(json, "\"quota_exhausted\"");
        assert_eq!(ErrorKind::TransportError.to_string(), "transport_error");
    }

    #[test]
    fn test_setup_errors_are_fatal() {
        assert!(HermesError::Configuration("x".into()).is_fatal_setup());
        assert!(
            HermesError::CredentialMissing {
                provider: "openai".into()
            }
            .is_fatal_setup()
        );
        assert!(!HermesError::Cancelled.is_fatal_setup());
    }

    #[test]
    fn test_embedding_error_exposes_kind() {
        let err = HermesError::Embedding {
            kind: ErrorKind::RateLimited,
            message: "slow down".into(),
            text_preview: "hello".into(),
        };
        assert_eq!(err.kind(), Some(ErrorKind::RateLimited));
        assert!(err.to_string().contains("rate_limited"));
    }
}
