//! Stable error codes and the transport error contract.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable code attached to every lister failure.
///
/// Sessions expose this to the UI so pickers can render an inline message
/// without matching on error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AccessDenied,
    FetchFailed,
    ExtractNotArray,
    MappingFailed,
    UnknownPreset,
    UnknownSession,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AccessDenied => "access_denied",
            Self::FetchFailed => "fetch_failed",
            Self::ExtractNotArray => "extract_not_array",
            Self::MappingFailed => "mapping_failed",
            Self::UnknownPreset => "unknown_preset",
            Self::UnknownSession => "unknown_session",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by an HTTP transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Response status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Connection, DNS, TLS or timeout failure.
    #[error("network error: {0}")]
    Network(String),

    /// The response body was not valid JSON.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// The request could not be built, e.g. a relative endpoint with no base URL.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Returns whether a retry might succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) | Self::InvalidRequest(_) => false,
        }
    }
}
