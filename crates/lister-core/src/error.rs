//! Error types for lister operations.

use lister_model::{ErrorCode, TransportError};
use thiserror::Error;

/// Errors raised by the fetch pipeline and the runtime.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ListerError {
    /// The permission evaluator rejected the request; nothing was sent.
    #[error("access denied to lister `{kind}` ({endpoint})")]
    AccessDenied { kind: String, endpoint: String },

    /// The transport failed or the server answered with an error status.
    #[error("fetch failed for {endpoint}: {source}")]
    FetchFailed {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    /// The selector did not resolve to an array.
    #[error("selector `{selector}` did not resolve to an array in the response from {endpoint}")]
    ExtractNotArray { selector: String, endpoint: String },

    /// A mapping rule failed for one item.
    #[error("mapping `{field}` failed for item {index} from {endpoint}: {message}")]
    MappingFailed {
        endpoint: String,
        field: &'static str,
        index: usize,
        message: String,
    },

    /// No preset is registered under this kind.
    #[error("unknown lister preset: {kind}")]
    UnknownPreset { kind: String },

    /// The session id is not open.
    #[error("unknown lister session: {id}")]
    UnknownSession { id: String },
}

impl ListerError {
    /// Stable code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AccessDenied { .. } => ErrorCode::AccessDenied,
            Self::FetchFailed { .. } => ErrorCode::FetchFailed,
            Self::ExtractNotArray { .. } => ErrorCode::ExtractNotArray,
            Self::MappingFailed { .. } => ErrorCode::MappingFailed,
            Self::UnknownPreset { .. } => ErrorCode::UnknownPreset,
            Self::UnknownSession { .. } => ErrorCode::UnknownSession,
        }
    }

    /// Returns a message suitable for display inside a picker.
    #[must_use]
    pub fn user_message(&self) -> &str {
        match self {
            Self::AccessDenied { .. } => "You do not have access to this list.",
            Self::FetchFailed { .. } => "Could not load the list. Please try again.",
            Self::ExtractNotArray { .. } | Self::MappingFailed { .. } => {
                "The server returned data in an unexpected format."
            }
            Self::UnknownPreset { .. } | Self::UnknownSession { .. } => {
                "This list is not available."
            }
        }
    }

    /// Returns whether a refresh might succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::FetchFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Result type alias for lister operations.
pub type Result<T> = std::result::Result<T, ListerError>;
