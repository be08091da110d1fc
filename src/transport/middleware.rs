//! Cross-cutting request hooks.
//!
//! The client registers exactly two, in this order:
//! [`AttachCredential`] then [`DetectUnauthorized`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{ApiRequest, RawResponse};
use crate::error::TransportError;
use crate::session::{Session, SignOutReason};

/// A hook around every [`Transport::send`](super::Transport::send) call.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Runs before the exchange. An error aborts the call without touching
    /// the network.
    async fn on_request(&self, _request: &mut ApiRequest) -> Result<(), TransportError> {
        Ok(())
    }

    /// Runs after the exchange, before the outcome reaches the caller.
    async fn on_response(
        &self,
        _request: &ApiRequest,
        _outcome: &Result<RawResponse, TransportError>,
    ) {
    }
}

/// Attaches the current bearer credential to every request.
///
/// Authenticated endpoints called with no credential fail fast with
/// [`TransportErrorKind::NoCredential`](crate::error::TransportErrorKind::NoCredential).
pub struct AttachCredential {
    session: Arc<Session>,
}

impl AttachCredential {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Middleware for AttachCredential {
    fn name(&self) -> &'static str {
        "attach_credential"
    }

    async fn on_request(&self, request: &mut ApiRequest) -> Result<(), TransportError> {
        match self.session.bearer().await {
            Some((token, generation)) => {
                request.bearer = Some(token);
                request.credential_generation = Some(generation);
                Ok(())
            }
            None if request.requires_auth => Err(TransportError::no_credential()),
            None => Ok(()),
        }
    }
}

/// Ends the session when an authenticated call comes back 401.
///
/// The purge is keyed on the credential generation the request carried, so
/// it fires at most once per credential and never clears a newer login.
pub struct DetectUnauthorized {
    session: Arc<Session>,
}

impl DetectUnauthorized {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Middleware for DetectUnauthorized {
    fn name(&self) -> &'static str {
        "detect_unauthorized"
    }

    async fn on_response(
        &self,
        request: &ApiRequest,
        outcome: &Result<RawResponse, TransportError>,
    ) {
        let Err(err) = outcome else {
            return;
        };
        if !err.is_unauthorized() || !request.requires_auth {
            return;
        }
        let Some(generation) = request.credential_generation else {
            return;
        };

        if self
            .session
            .sign_out_if_current(generation, SignOutReason::Expired)
            .await
        {
            warn!(
                request_id = %request.id,
                path = %request.path(),
                "Credential rejected by server, session purged"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;

    use super::*;
    use crate::error::TransportErrorKind;
    use crate::model::User;
    use crate::session::SessionPhase;
    use crate::store::{AUTH_TOKEN_KEY, CredentialStore, MemoryCredentialStore};
    use crate::test_support::ScriptedBackend;
    use crate::transport::{Method, Transport};

    fn worker() -> User {
        User {
            id: "worker-1".into(),
            email: "worker@example.com".into(),
            name: "John Worker".into(),
        }
    }

    async fn signed_in() -> (Arc<MemoryCredentialStore>, Arc<Session>) {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = Arc::new(Session::new(store.clone()));
        session.begin_login().await.unwrap();
        session
            .establish(SecretString::from("tok-1"), worker())
            .await
            .unwrap();
        (store, session)
    }

    fn transport(backend: Arc<ScriptedBackend>, session: &Arc<Session>) -> Transport {
        Transport::new(backend, Duration::from_secs(10))
            .with_middleware(Arc::new(AttachCredential::new(Arc::clone(session))))
            .with_middleware(Arc::new(DetectUnauthorized::new(Arc::clone(session))))
    }

    #[tokio::test]
    async fn attaches_bearer_to_get_and_post() {
        let (_store, session) = signed_in().await;
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond(Method::Get, "orders", 200, r#"{"data": []}"#);
        backend.respond(Method::Post, "accept/1", 200, "");
        let transport = transport(backend.clone(), &session);

        transport.send(ApiRequest::get(["orders"])).await.unwrap();
        transport.send(ApiRequest::post(["accept", "1"])).await.unwrap();

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.bearer.as_deref() == Some("tok-1")));
    }

    #[tokio::test]
    async fn anonymous_session_fails_fast() {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = Arc::new(Session::new(store));
        let backend = Arc::new(ScriptedBackend::new());
        let transport = transport(backend.clone(), &session);

        let err = transport.send(ApiRequest::get(["orders"])).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::NoCredential);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn login_goes_out_without_credential() {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = Arc::new(Session::new(store));
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond(Method::Post, "login", 401, r#"{"detail": "Incorrect email or password"}"#);
        let transport = transport(backend.clone(), &session);

        let err = transport
            .send(ApiRequest::post(["login"]).anonymous())
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(backend.calls()[0].bearer, None);
    }

    #[tokio::test]
    async fn unauthorized_purges_before_error_returns() {
        let (store, session) = signed_in().await;
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond(Method::Post, "complete/9", 401, r#"{"detail": "expired"}"#);
        let transport = transport(backend, &session);

        let err = transport
            .send(ApiRequest::post(["complete", "9"]))
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());

        assert_eq!(session.phase().await, SessionPhase::Anonymous);
        assert!(store.get(AUTH_TOKEN_KEY).await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn stale_401_does_not_clear_newer_login() {
        let (_store, session) = signed_in().await;
        let (_, first_generation) = session.bearer().await.unwrap();

        session.begin_login().await.unwrap();
        session
            .establish(SecretString::from("tok-2"), worker())
            .await
            .unwrap();

        assert!(
            !session
                .sign_out_if_current(first_generation, SignOutReason::Expired)
                .await
        );
        assert_eq!(session.phase().await, SessionPhase::Authenticated);
    }

    #[tokio::test]
    async fn purge_happens_once() {
        let (_store, session) = signed_in().await;
        let mut events = session.subscribe();
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond(Method::Get, "orders", 401, "");
        backend.respond(Method::Get, "earnings", 401, "");
        let transport = transport(backend.clone(), &session);

        assert!(transport.send(ApiRequest::get(["orders"])).await.is_err());
        // Second call never reaches the server with the dead token.
        let err = transport.send(ApiRequest::get(["earnings"])).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::NoCredential);
        assert_eq!(backend.call_count(), 1);

        let first = events.recv().await.unwrap();
        assert!(matches!(
            first,
            crate::session::SessionEvent::SignedOut {
                reason: SignOutReason::Expired
            }
        ));
        assert!(events.try_recv().is_err());
    }
}
