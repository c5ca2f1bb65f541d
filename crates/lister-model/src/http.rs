//! Request shape handed to an HTTP transport.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::Map;
use crate::definition::HttpMethod;

/// A fully built list request.
///
/// `params` travel as the query string for `GET`/`DELETE`; transports
/// decide how to encode them for other verbs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub endpoint: String,
    pub params: Map,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
}

impl HttpRequest {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            endpoint: endpoint.into(),
            params: Map::new(),
            body: None,
            headers: BTreeMap::new(),
        }
    }
}
