//! HTTP transport with an explicit middleware chain.
//!
//! Every call goes through [`Transport::send`]:
//!
//! 1. outbound hooks run in registration order (credential attach first),
//! 2. the [`HttpBackend`] performs the exchange under the configured timeout,
//! 3. non-2xx statuses become a [`TransportError`],
//! 4. inbound hooks run in reverse registration order (401 detection),
//! 5. the outcome is returned to the caller.
//!
//! Inbound hooks complete before the caller sees the outcome.

pub mod middleware;
pub mod reqwest_backend;

pub use middleware::{AttachCredential, DetectUnauthorized, Middleware};
pub use reqwest_backend::ReqwestBackend;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::error::TransportError;
use crate::model::ApiResponse;

/// HTTP verbs used by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// A request on its way through the middleware chain.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Correlates log lines for one call.
    pub id: Uuid,
    pub method: Method,
    /// Path segments relative to the base URL, unencoded.
    pub segments: Vec<String>,
    pub body: Option<serde_json::Value>,
    /// Whether the endpoint rejects calls without a bearer credential.
    pub requires_auth: bool,
    /// Filled in by [`AttachCredential`].
    pub bearer: Option<SecretString>,
    /// Session generation the bearer belongs to.
    pub credential_generation: Option<u64>,
}

impl ApiRequest {
    fn new<I, S>(method: Method, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: Uuid::new_v4(),
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            body: None,
            requires_auth: true,
            bearer: None,
            credential_generation: None,
        }
    }

    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::Get, segments)
    }

    pub fn post<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::Post, segments)
    }

    /// Attach a JSON body.
    pub fn with_json<B: Serialize>(mut self, body: &B) -> Result<Self, TransportError> {
        let value = serde_json::to_value(body)
            .map_err(|e| TransportError::decode(format!("request body: {e}")))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Mark the endpoint as callable without a session (login).
    pub fn anonymous(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    /// `/`-joined path for logs and routing.
    pub fn path(&self) -> String {
        self.segments.join("/")
    }
}

/// Status and body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs a single HTTP exchange. No retries, no status interpretation.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<RawResponse, TransportError>;
}

/// Single HTTP client: one backend, one timeout, an ordered middleware chain.
pub struct Transport {
    backend: Arc<dyn HttpBackend>,
    middleware: Vec<Arc<dyn Middleware>>,
    timeout: Duration,
}

impl Transport {
    pub fn new(backend: Arc<dyn HttpBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            middleware: Vec::new(),
            timeout,
        }
    }

    /// Append a middleware. Outbound order is registration order.
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Names of the registered middleware, in outbound order.
    pub fn middleware_names(&self) -> Vec<&'static str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }

    /// Run a request through the chain.
    pub async fn send(&self, mut request: ApiRequest) -> Result<RawResponse, TransportError> {
        for middleware in &self.middleware {
            middleware.on_request(&mut request).await?;
        }

        let started = tokio::time::Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, self.backend.execute(&request)).await
        {
            Ok(Ok(response)) if response.is_success() => Ok(response),
            Ok(Ok(response)) => Err(TransportError::status(
                response.status,
                error_detail(&response.body),
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::timeout(format!(
                "no response within {}s",
                self.timeout.as_secs_f32()
            ))),
        };

        debug!(
            request_id = %request.id,
            method = %request.method,
            path = %request.path(),
            status = ?outcome.as_ref().map(|r| r.status).map_err(|e| e.status),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "HTTP exchange finished"
        );

        for middleware in self.middleware.iter().rev() {
            middleware.on_response(&request, &outcome).await;
        }

        outcome
    }

    /// Send and decode the `{data, message?}` envelope.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<T, TransportError> {
        let response = self.send(request).await?;
        let envelope: ApiResponse<T> = serde_json::from_str(&response.body)
            .map_err(|e| TransportError::decode(e.to_string()))?;
        Ok(envelope.data)
    }
}

/// Pull a human-readable reason out of an error body (`{"detail": ...}` or
/// `{"message": ...}`), falling back to a truncated raw body.
fn error_detail(body: &str) -> String {
    const MAX_DETAIL: usize = 200;

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["detail", "message"] {
            if let Some(s) = value.get(field).and_then(|v| v.as_str()) {
                return s.to_string();
            }
        }
    }
    if body.is_empty() {
        return "empty response body".to_string();
    }
    body.chars().take(MAX_DETAIL).collect()
}
