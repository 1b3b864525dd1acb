// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request/response transport used by the managed store providers.
//!
//! Providers describe *what* to send ([`TransportRequest`]); a [`Transport`]
//! decides *how*. [`HttpTransport`] is the reqwest implementation; tests
//! substitute scripted transports.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use super::{ProviderKind, StorageError};

/// Longest backend error text carried into a `StorageError`.
const MAX_ERROR_TEXT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A request relative to a provider's base endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    /// Path below the base endpoint, without a leading slash.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl TransportRequest {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Query value for `key`, if present.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response from a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json_body(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Backend error text: `error` or `message` from a JSON body, otherwise
    /// the (truncated) raw body.
    pub fn error_message(&self) -> String {
        if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(&self.body) {
            for key in ["error", "message"] {
                if let Some(text) = map.get(key).and_then(Value::as_str) {
                    return text.to_string();
                }
            }
        }

        let text = String::from_utf8_lossy(&self.body);
        let text = text.trim();
        if text.is_empty() {
            format!("HTTP {}", self.status)
        } else {
            text.chars().take(MAX_ERROR_TEXT).collect()
        }
    }
}

/// The exchange never completed (connect, timeout, broken body).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportFailure(pub String);

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure>;
}

/// Map a non-success response onto the storage error taxonomy.
///
/// 5xx means the backend is unavailable; anything else is a refusal.
pub fn classify_failure(provider: ProviderKind, response: &TransportResponse) -> StorageError {
    if response.status >= 500 {
        StorageError::transport(
            provider,
            format!("HTTP {}: {}", response.status, response.error_message()),
        )
    } else {
        StorageError::rejected(provider, Some(response.status), response.error_message())
    }
}

/// A success response whose body could not be decoded.
pub fn unreadable(provider: ProviderKind, err: serde_json::Error) -> StorageError {
    StorageError::transport(provider, format!("unreadable response: {err}"))
}

/// An exchange that never completed.
pub fn unreachable(provider: ProviderKind, failure: TransportFailure) -> StorageError {
    StorageError::transport(provider, failure.0)
}

// =============================================================================
// HTTP Transport
// =============================================================================

#[derive(Debug, Clone)]
struct AuthHeader {
    name: String,
    value: String,
}

/// reqwest-backed transport bound to one base endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: Url,
    auth: Option<AuthHeader>,
    http: Client,
}

impl HttpTransport {
    /// Create a transport for `base_url` with a per-request timeout.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, TransportFailure> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportFailure(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: with_trailing_slash(base_url),
            auth: None,
            http,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_bearer_token(mut self, token: &str) -> Self {
        self.auth = Some(AuthHeader {
            name: "authorization".to_string(),
            value: format!("Bearer {token}"),
        });
        self
    }

    /// Send `x-api-key: <key>` with every request.
    pub fn with_api_key(mut self, key: &str) -> Self {
        self.auth = Some(AuthHeader {
            name: "x-api-key".to_string(),
            value: key.to_string(),
        });
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportFailure> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportFailure(format!("invalid request path `{path}`: {e}")))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure> {
        let url = self.endpoint(&request.path)?;
        let mut builder = self.http.request(request.method.into(), url.clone());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(auth) = &self.auth {
            builder = builder.header(auth.name.as_str(), auth.value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportFailure(format!("request to {url} failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportFailure(format!("reading response from {url} failed: {e}")))?;

        tracing::debug!(method = ?request.method, %url, status, "managed store response");

        Ok(TransportResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// `Url::join` replaces the last segment unless the base ends with `/`.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

// =============================================================================
// Test support
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Transport that replays canned responses and records every request.
    #[derive(Default)]
    pub struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<TransportResponse, TransportFailure>>>,
        requests: Mutex<Vec<TransportRequest>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(self, status: u16, body: Value) -> Self {
            self.responses
                .lock()
                .unwrap()
                .push_back(Ok(TransportResponse::json_body(status, &body)));
            self
        }

        pub fn respond_raw(self, status: u16, body: &str) -> Self {
            self.responses
                .lock()
                .unwrap()
                .push_back(Ok(TransportResponse::new(status, body)));
            self
        }

        pub fn fail(self, message: &str) -> Self {
            self.responses
                .lock()
                .unwrap()
                .push_back(Err(TransportFailure(message.to_string())));
            self
        }

        pub fn requests(&self) -> Vec<TransportRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportFailure> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportFailure("no scripted response".into())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_builders_set_method_and_query() {
        let request = TransportRequest::get("messages")
            .with_query("ownerAddress", "0xabc")
            .with_query("limit", "50");
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.query_value("ownerAddress"), Some("0xabc"));
        assert_eq!(request.query_value("limit"), Some("50"));
        assert_eq!(request.query_value("missing"), None);

        let put = TransportRequest::put("messages/0xabc", json!([]));
        assert_eq!(put.method, Method::Put);
        assert_eq!(put.body, Some(json!([])));
    }

    #[test]
    fn error_message_prefers_json_fields() {
        let response = TransportResponse::json_body(429, &json!({ "error": "quota exceeded" }));
        assert_eq!(response.error_message(), "quota exceeded");

        let response = TransportResponse::json_body(400, &json!({ "message": "bad owner" }));
        assert_eq!(response.error_message(), "bad owner");

        let response = TransportResponse::new(502, "Bad Gateway");
        assert_eq!(response.error_message(), "Bad Gateway");

        let response = TransportResponse::new(503, "");
        assert_eq!(response.error_message(), "HTTP 503");
    }

    #[test]
    fn server_errors_are_transport_and_client_errors_are_rejections() {
        let unavailable = classify_failure(ProviderKind::KvStore, &TransportResponse::new(503, ""));
        assert!(unavailable.is_retryable());

        let quota = classify_failure(
            ProviderKind::KvStore,
            &TransportResponse::json_body(429, &json!({ "error": "quota exceeded" })),
        );
        assert!(!quota.is_retryable());
        assert_eq!(
            quota,
            StorageError::rejected(ProviderKind::KvStore, Some(429), "quota exceeded")
        );
    }

    #[test]
    fn base_url_keeps_its_path() {
        let transport = HttpTransport::new(
            Url::parse("https://store.example.com/api/v1").unwrap(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(transport.base_url().as_str(), "https://store.example.com/api/v1/");
        assert_eq!(
            transport.endpoint("/messages/0xabc").unwrap().as_str(),
            "https://store.example.com/api/v1/messages/0xabc"
        );
        assert_eq!(
            transport.endpoint("health").unwrap().as_str(),
            "https://store.example.com/api/v1/health"
        );
    }
}
