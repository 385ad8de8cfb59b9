//! Transport-level errors produced by provider adapters.

use std::time::Duration;
use thiserror::Error;

use crate::error::ErrorKind;

/// Errors that can occur when talking to a provider.
///
/// Adapters build these from raw HTTP failures; the retry state machine only
/// consults [`ProviderError::kind`] and [`ProviderError::is_retryable`].
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Transient throttling
    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        /// Error message
        message: String,
        /// Provider-suggested wait, if any
        retry_after: Option<Duration>,
    },

    /// The account or key has no remaining allowance
    #[error("Quota exhausted: {message}")]
    QuotaExhausted {
        /// Error message
        message: String,
    },

    /// Connect, read or overall request timeout
    #[error("Request timed out: {message}")]
    Timeout {
        /// Error message
        message: String,
    },

    /// Connection could not be established
    #[error("Connection error: {message}")]
    Connection {
        /// Error message
        message: String,
    },

    /// Non-success HTTP status not covered by a more specific variant
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Error message
        message: String,
    },

    /// The provider rejected the request payload
    #[error("Invalid request: {message}")]
    Validation {
        /// Error message
        message: String,
    },

    /// The response body did not match the wire contract
    #[error("Malformed response: {message}")]
    Decode {
        /// Error message
        message: String,
    },
}

impl ProviderError {
    /// Create a rate limit error.
    pub fn rate_limited<S: Into<String>>(message: S) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a quota exhaustion error.
    pub fn quota_exhausted<S: Into<String>>(message: S) -> Self {
        Self::QuotaExhausted {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a connection error.
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an HTTP status error.
    pub fn http<S: Into<String>>(status: u16, message: S) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a decode error.
    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Failed-item classification for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::QuotaExhausted { .. } => ErrorKind::QuotaExhausted,
            Self::Validation { .. } => ErrorKind::ValidationError,
            Self::Timeout { .. }
            | Self::Connection { .. }
            | Self::Http { .. }
            | Self::Decode { .. } => ErrorKind::TransportError,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Quota exhaustion, validation and client-side HTTP errors are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Connection { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            Self::QuotaExhausted { .. } | Self::Validation { .. } | Self::Decode { .. } => false,
        }
    }

    /// Quota exhaustion terminates a whole run
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, Self::QuotaExhausted { .. })
    }

    /// Provider-suggested wait for rate limits
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// The message without the variant prefix
    pub fn message(&self) -> &str {
        match self {
            Self::RateLimited { message, .. }
            | Self::QuotaExhausted { message }
            | Self::Timeout { message }
            | Self::Connection { message }
            | Self::Http { message, .. }
            | Self::Validation { message }
            | Self::Decode { message } => message,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else if err.is_connect() {
            Self::connection(err.to_string())
        } else if err.is_decode() {
            Self::decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::http(status.as_u16(), err.to_string())
        } else {
            Self::connection(err.to_string())
        }
    }
}
