//! `HttpTransport` implementation over a shared `reqwest::Client`.

use std::time::Duration;

use async_trait::async_trait;
use lister_core::{HttpConfig, HttpTransport};
use lister_model::{HttpMethod, HttpRequest, Map, TransportError, value_text};
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::error::{ClientError, transport_error};

/// User agent string for list requests.
const USER_AGENT_VALUE: &str = concat!("lister/", env!("CARGO_PKG_VERSION"));

/// Error bodies are cut to this many characters.
const MAX_ERROR_BODY: usize = 512;

/// Transport resolving endpoints against an optional base URL.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl ReqwestTransport {
    /// Build a transport from `[http]` settings.
    pub fn new(config: &HttpConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        for (name, value) in &config.headers {
            let invalid = || ClientError::InvalidHeader { name: name.clone() };
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            headers.insert(header, value);
        }

        if let Some(url) = &config.base_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ClientError::InvalidBaseUrl { url: url.clone() });
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    /// Absolute URL for `endpoint`.
    pub fn url_for(&self, endpoint: &str) -> Result<String, TransportError> {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Ok(endpoint.to_string());
        }
        match &self.base_url {
            Some(base) => Ok(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                endpoint.trim_start_matches('/')
            )),
            None => Err(TransportError::InvalidRequest(format!(
                "relative endpoint `{endpoint}` needs a base URL"
            ))),
        }
    }

    async fn handle_response(response: reqwest::Response) -> Result<Value, TransportError> {
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<Value, TransportError> {
        let url = self.url_for(&request.endpoint)?;
        tracing::debug!(method = %request.method, url = %url, "sending lister request");

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
            HttpMethod::Patch => self.client.patch(&url),
            HttpMethod::Delete => self.client.delete(&url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.method {
            HttpMethod::Get | HttpMethod::Delete => builder.query(&query_pairs(&request.params)),
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch => {
                let body = request.body.unwrap_or(Value::Object(request.params));
                builder.json(&body)
            }
        };

        let response = builder.send().await.map_err(transport_error)?;
        let result = Self::handle_response(response).await;
        if let Err(err) = &result {
            tracing::debug!(url = %url, error = %err, "lister request failed");
        }
        result
    }
}

/// Flatten params into query pairs.
///
/// Arrays repeat their key once per element; nulls are left out.
pub fn query_pairs(params: &Map) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len());
    for (key, value) in params {
        match value {
            Value::Null => {}
            Value::Array(items) => pairs.extend(
                items
                    .iter()
                    .filter(|item| !item.is_null())
                    .map(|item| (key.clone(), value_text(item))),
            ),
            other => pairs.push((key.clone(), value_text(other))),
        }
    }
    pairs
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut cut: String = body.chars().take(MAX_ERROR_BODY).collect();
    cut.push('…');
    cut
}
