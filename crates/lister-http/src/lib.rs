//! HTTP transport for the lister runtime, built on `reqwest`.

mod client;
mod error;

pub use client::{ReqwestTransport, query_pairs};
pub use error::{ClientError, transport_error};
