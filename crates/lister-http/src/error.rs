//! Error types for building and using the HTTP client.

use lister_model::TransportError;
use thiserror::Error;

/// Failure building a [`crate::ReqwestTransport`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    #[error("invalid header `{name}`")]
    InvalidHeader { name: String },

    #[error("invalid base URL `{url}`")]
    InvalidBaseUrl { url: String },

    #[error("failed to create HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

/// Classify a `reqwest` error for the lister pipeline.
pub fn transport_error(err: reqwest::Error) -> TransportError {
    if let Some(status) = err.status() {
        return TransportError::Status {
            status: status.as_u16(),
            body: String::new(),
        };
    }
    if err.is_decode() {
        return TransportError::Decode(err.to_string());
    }
    if err.is_builder() {
        return TransportError::InvalidRequest(err.to_string());
    }
    TransportError::Network(err.to_string())
}
