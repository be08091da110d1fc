//! Scripted doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::ExposeSecret;

use crate::error::TransportError;
use crate::transport::{ApiRequest, HttpBackend, Method, RawResponse};

/// One scripted reply.
#[derive(Clone)]
struct Reply {
    delay: Duration,
    result: Result<RawResponse, TransportError>,
}

/// What the backend saw.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<serde_json::Value>,
}

/// [`HttpBackend`] that replays canned responses per `METHOD path`.
///
/// Replies queue up per route; the last one repeats once the queue drains.
/// Unscripted routes answer 404.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn route(method: Method, path: &str) -> String {
        format!("{method} {path}")
    }

    fn push(&self, method: Method, path: &str, reply: Reply) {
        self.routes
            .lock()
            .entry(Self::route(method, path))
            .or_default()
            .push_back(reply);
    }

    pub fn respond(&self, method: Method, path: &str, status: u16, body: &str) {
        self.respond_after(method, path, Duration::ZERO, status, body);
    }

    pub fn respond_after(&self, method: Method, path: &str, delay: Duration, status: u16, body: &str) {
        self.push(
            method,
            path,
            Reply {
                delay,
                result: Ok(RawResponse::new(status, body)),
            },
        );
    }

    pub fn fail(&self, method: Method, path: &str, err: TransportError) {
        self.push(
            method,
            path,
            Reply {
                delay: Duration::ZERO,
                result: Err(err),
            },
        );
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_to(&self, method: Method, path: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }
}

#[async_trait]
impl HttpBackend for ScriptedBackend {
    async fn execute(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let path = request.path();
        self.calls.lock().push(RecordedCall {
            method: request.method,
            path: path.clone(),
            bearer: request.bearer.as_ref().map(|t| t.expose_secret().to_string()),
            body: request.body.clone(),
        });

        let reply = {
            let mut routes = self.routes.lock();
            match routes.get_mut(&Self::route(request.method, &path)) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(reply) => {
                if !reply.delay.is_zero() {
                    tokio::time::sleep(reply.delay).await;
                }
                reply.result
            }
            None => Ok(RawResponse::new(404, r#"{"detail": "Not Found"}"#)),
        }
    }
}
