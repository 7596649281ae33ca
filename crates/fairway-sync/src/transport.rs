//! # HTTP Transport
//!
//! The single network seam of the request layer.
//!
//! ```text
//! ┌──────────────┐   HttpRequest    ┌─────────────────┐
//! │  ApiClient   │ ───────────────► │ HttpTransport   │ ──► network
//! │ (timeout,    │ ◄─────────────── │ (ReqwestTransport│
//! │  retry,      │   HttpResponse   │  in production) │
//! │  classify)   │   or Transport-  └─────────────────┘
//! └──────────────┘   Error
//! ```
//!
//! A transport only moves bytes: any status code is a successful exchange.
//! Timeouts, retries and status classification belong to the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use fairway_core::HttpMethod;

// =============================================================================
// Request / Response
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed JSON body. Empty bodies are `Null`; non-JSON bodies are a string.
    pub body: Value,
}

impl HttpResponse {
    pub fn new(status: u16, body: Value) -> Self {
        HttpResponse { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The exchange itself failed (no status code available).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transport error: {0}")]
    Other(String),
}

/// Sends one HTTP exchange.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

// =============================================================================
// Reqwest Transport
// =============================================================================

/// Production transport over a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// `ceiling` is a last-resort timeout; the request layer applies the
    /// per-call timeout itself.
    pub fn new(ceiling: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(ceiling)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(ReqwestTransport { client })
    }

    fn headers(request: &HttpRequest) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(format!("header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidRequest(format!("header value: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

fn reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

/// Parses a response body leniently.
pub(crate) fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let headers = Self::headers(&request)?;
        let mut builder = self
            .client
            .request(reqwest_method(request.method), &request.url)
            .headers(headers);
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Other(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Other(format!("failed to read body: {e}")))?;
        debug!(method = %request.method, url = %request.url, status, "HTTP exchange complete");

        Ok(HttpResponse {
            status,
            body: parse_body(&text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("{\"id\":1}"), json!({"id": 1}));
        assert_eq!(parse_body("Bad Gateway"), json!("Bad Gateway"));
    }

    #[test]
    fn test_rejects_bad_header_names() {
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: "https://pos.example.com".into(),
            headers: vec![("bad header".into(), "x".into())],
            body: None,
        };
        assert!(matches!(
            ReqwestTransport::headers(&request),
            Err(TransportError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_response_success_range() {
        assert!(HttpResponse::new(204, Value::Null).is_success());
        assert!(!HttpResponse::new(404, Value::Null).is_success());
    }
}
