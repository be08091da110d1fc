//! reqwest-backed [`HttpBackend`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use secrecy::ExposeSecret;

use super::{ApiRequest, HttpBackend, Method, RawResponse};
use crate::error::TransportError;

/// Talks to the real API over HTTP.
pub struct ReqwestBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl ReqwestBackend {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("worker-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url })
    }

    /// Resolve request segments against the base URL, percent-encoding each.
    pub fn url_for(&self, request: &ApiRequest) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                TransportError::network(format!("base URL {} cannot carry a path", self.base_url))
            })?;
            segments.pop_if_empty();
            segments.extend(request.segments.iter());
        }
        Ok(url)
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn execute(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let url = self.url_for(request)?;

        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token.expose_secret());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;

        Ok(RawResponse { status, body })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::timeout(err.to_string())
    } else if err.is_decode() {
        TransportError::decode(err.to_string())
    } else {
        TransportError::network(err.to_string())
    }
}
