//! Composition root: one [`WorkerClient`] per app process.
//!
//! Wires the credential store, session, transport chain, synchronizer and job
//! lifecycle together, and owns the background tasks (orders poller and the
//! session watcher that clears the cache when a session ends).

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::error::Error;
use crate::lifecycle::JobLifecycle;
use crate::model::{Earnings, Order, User};
use crate::session::{Session, SessionEvent, SessionManager, SessionPhase};
use crate::store::{CredentialStore, LibSqlCredentialStore};
use crate::sync::{
    self, FallbackProvider, OfflineDataset, ResourceKey, ResourceStatus, ResourceSync, Snapshot,
    SyncEvent,
};
use crate::transport::{AttachCredential, DetectUnauthorized, HttpBackend, ReqwestBackend, Transport};

pub struct WorkerClient {
    config: ClientConfig,
    session: Arc<Session>,
    sessions: SessionManager,
    sync: Arc<ResourceSync>,
    jobs: JobLifecycle,
    poller: Mutex<Option<JoinHandle<()>>>,
    watcher: JoinHandle<()>,
}

impl WorkerClient {
    /// Open the on-disk credential store and talk HTTP to `config.base_url`.
    pub async fn connect(config: ClientConfig) -> Result<Self, Error> {
        let store = LibSqlCredentialStore::new_local(&config.credential_db_path).await?;
        let backend = ReqwestBackend::new(config.base_url.clone(), config.request_timeout)?;
        info!(
            base_url = %config.base_url,
            db = %config.credential_db_path.display(),
            "Worker client ready"
        );
        Ok(Self::with_parts(config, Arc::new(store), Arc::new(backend)))
    }

    /// Assemble from explicit parts. Must be called inside a Tokio runtime.
    pub fn with_parts(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        backend: Arc<dyn HttpBackend>,
    ) -> Self {
        let session = Arc::new(Session::new(store));

        // Attach runs first on the way out, 401 detection first on the way back.
        let transport = Transport::new(backend, config.request_timeout)
            .with_middleware(Arc::new(AttachCredential::new(Arc::clone(&session))))
            .with_middleware(Arc::new(DetectUnauthorized::new(Arc::clone(&session))));
        debug!(chain = ?transport.middleware_names(), "Transport assembled");
        let api = Arc::new(ApiClient::new(Arc::new(transport)));

        let fallback: Option<Arc<dyn FallbackProvider>> = Some(Arc::new(OfflineDataset));
        let sync = Arc::new(ResourceSync::new(api.clone(), &config, fallback));
        let jobs = JobLifecycle::new(api.clone(), Arc::clone(&sync));
        let sessions = SessionManager::new(Arc::clone(&session), api);
        let watcher = spawn_session_watcher(session.subscribe(), Arc::clone(&sync));

        Self {
            config,
            session,
            sessions,
            sync,
            jobs,
            poller: Mutex::new(None),
            watcher,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ── Session ─────────────────────────────────────────────────────────

    /// Cold start. Returns the stored worker, if a session was persisted.
    pub async fn restore_session(&self) -> Result<Option<User>, Error> {
        self.sessions.restore_session().await
    }

    /// Sign in. A successful login starts from an empty cache, even when it
    /// replaces a live session without a logout in between.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, Error> {
        let user = self.sessions.login(email, password).await?;
        self.sync.reset();
        Ok(user)
    }

    pub async fn logout(&self) {
        self.sessions.logout().await;
        self.sync.reset();
    }

    pub async fn phase(&self) -> SessionPhase {
        self.session.phase().await
    }

    pub async fn user(&self) -> Option<User> {
        self.session.user().await
    }

    pub fn subscribe_session(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    // ── Resources ───────────────────────────────────────────────────────

    pub async fn orders(&self) -> Result<Snapshot<Vec<Order>>, Error> {
        self.sync.orders().await
    }

    pub async fn refresh_orders(&self) -> Result<Snapshot<Vec<Order>>, Error> {
        self.sync.refresh_orders().await
    }

    pub async fn earnings(&self) -> Result<Snapshot<Earnings>, Error> {
        self.sync.earnings().await
    }

    pub async fn refresh_earnings(&self) -> Result<Snapshot<Earnings>, Error> {
        self.sync.refresh_earnings().await
    }

    pub async fn current_job(&self) -> Result<Option<Order>, Error> {
        self.sync.current_job().await
    }

    pub fn status(&self, key: ResourceKey) -> ResourceStatus {
        self.sync.status(key)
    }

    pub fn subscribe_sync(&self) -> broadcast::Receiver<SyncEvent> {
        self.sync.subscribe()
    }

    // ── Jobs ────────────────────────────────────────────────────────────

    pub async fn accept(&self, order_id: &str) -> Result<(), Error> {
        self.jobs.accept(order_id).await
    }

    pub async fn complete(&self, order_id: &str) -> Result<(), Error> {
        self.jobs.complete(order_id).await
    }

    // ── Background work ─────────────────────────────────────────────────

    /// Start the orders poller. Calling again while it runs does nothing.
    pub fn start_polling(&self) {
        let mut poller = self.poller.lock();
        if poller.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        info!(period = ?self.config.orders_poll_interval, "Starting orders poller");
        *poller = Some(sync::spawn_orders_poller(
            Arc::clone(&self.sync),
            Arc::clone(&self.session),
            self.config.orders_poll_interval,
        ));
    }

    pub fn stop_polling(&self) {
        if let Some(handle) = self.poller.lock().take() {
            handle.abort();
            debug!("Orders poller stopped");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop every background task. The client stays usable for direct calls.
    pub fn shutdown(&self) {
        self.stop_polling();
        self.watcher.abort();
    }
}

impl Drop for WorkerClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Clear cached resources whenever the session ends, including a purge
/// triggered by a 401 deep inside the transport.
fn spawn_session_watcher(
    mut events: broadcast::Receiver<SessionEvent>,
    sync: Arc<ResourceSync>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::SignedOut { reason }) => {
                    debug!(reason = ?reason, "Session ended, clearing cached resources");
                    sync.reset();
                }
                Ok(SessionEvent::SignedIn { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Session watcher lagged, clearing cached resources");
                    sync.reset();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::error::AuthError;
    use crate::store::MemoryCredentialStore;
    use crate::sync::DataSource;
    use crate::test_support::ScriptedBackend;
    use crate::transport::Method;

    const LOGIN_OK: &str = r#"{"data": {"token": "jwt-1",
        "user": {"id": "worker-1", "email": "worker@example.com", "name": "John Worker"}}}"#;
    const ORDERS: &str = r#"{"data": [
        {"id": "1", "pickup": "a", "dropoff": "b", "eta": 15, "g_mean": 0.7, "g_var": 0.1, "status": "available"}
    ]}"#;

    fn client(backend: Arc<ScriptedBackend>) -> WorkerClient {
        WorkerClient::with_parts(
            ClientConfig::default(),
            Arc::new(MemoryCredentialStore::new()),
            backend,
        )
    }

    async fn wait_for_clear(rx: &mut broadcast::Receiver<SyncEvent>) {
        timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(SyncEvent::Cleared { .. }) = rx.recv().await {
                    return;
                }
            }
        })
        .await
        .expect("cache was not cleared");
    }

    #[tokio::test]
    async fn authenticated_reads_carry_the_token() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond(Method::Post, "login", 200, LOGIN_OK);
        backend.respond(Method::Get, "orders", 200, ORDERS);
        let client = client(backend.clone());

        client.login("worker@example.com", "pw").await.unwrap();
        let orders = client.orders().await.unwrap();
        assert_eq!(orders.source, DataSource::Network);

        let calls = backend.calls();
        assert_eq!(calls[0].bearer, None);
        assert_eq!(calls[1].bearer.as_deref(), Some("jwt-1"));
    }

    #[tokio::test]
    async fn reads_without_session_fail_fast() {
        let backend = Arc::new(ScriptedBackend::new());
        let client = client(backend.clone());

        let err = client.orders().await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::NotAuthenticated)));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn expired_token_signs_out_and_clears_cache() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond(Method::Post, "login", 200, LOGIN_OK);
        backend.respond(Method::Get, "orders", 200, ORDERS);
        backend.respond(Method::Get, "earnings", 401, r#"{"detail": "Token expired"}"#);
        let client = client(backend);
        let mut events = client.subscribe_sync();

        client.login("worker@example.com", "pw").await.unwrap();
        client.orders().await.unwrap();

        let err = client.earnings().await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::SessionExpired)));
        assert_eq!(client.phase().await, SessionPhase::Anonymous);

        wait_for_clear(&mut events).await;
        assert_eq!(client.status(ResourceKey::Orders).age, None);
    }

    #[tokio::test]
    async fn logout_clears_cache_immediately() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond(Method::Post, "login", 200, LOGIN_OK);
        backend.respond(Method::Get, "orders", 200, ORDERS);
        let client = client(backend);

        client.login("worker@example.com", "pw").await.unwrap();
        client.orders().await.unwrap();
        client.logout().await;

        assert!(client.user().await.is_none());
        assert!(client.status(ResourceKey::Orders).stale);
        assert!(client.status(ResourceKey::Orders).age.is_none());
    }

    #[tokio::test]
    async fn second_worker_never_sees_first_workers_orders() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond(Method::Post, "login", 200, LOGIN_OK);
        backend.respond(
            Method::Post,
            "login",
            200,
            r#"{"data": {"token": "jwt-2",
                "user": {"id": "worker-2", "email": "other@example.com", "name": "Jane Worker"}}}"#,
        );
        backend.respond(
            Method::Get,
            "orders",
            200,
            r#"{"data": [
                {"id": "A1", "pickup": "a", "dropoff": "b", "eta": 15, "g_mean": 0.7, "g_var": 0.1,
                 "status": "accepted", "workerId": "worker-1"}
            ]}"#,
        );
        backend.respond(Method::Get, "orders", 200, ORDERS);
        let client = client(backend.clone());

        client.login("worker@example.com", "pw").await.unwrap();
        assert_eq!(client.current_job().await.unwrap().unwrap().id, "A1");

        client.login("other@example.com", "pw").await.unwrap();
        assert_eq!(client.user().await.unwrap().id, "worker-2");
        assert!(client.status(ResourceKey::Orders).age.is_none());

        let orders = client.orders().await.unwrap();
        assert_eq!(orders.source, DataSource::Network);
        assert!(client.current_job().await.unwrap().is_none());
        assert_eq!(backend.calls_to(Method::Get, "orders"), 2);
        assert_eq!(backend.calls().last().unwrap().bearer.as_deref(), Some("jwt-2"));
    }

    #[tokio::test]
    async fn failed_login_keeps_the_signed_in_worker() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond(Method::Post, "login", 200, LOGIN_OK);
        backend.respond(Method::Post, "login", 401, r#"{"detail": "Incorrect email or password"}"#);
        backend.respond(Method::Get, "orders", 200, ORDERS);
        let client = client(backend.clone());

        client.login("worker@example.com", "pw").await.unwrap();
        client.orders().await.unwrap();

        let err = client.login("worker@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::LoginFailed { .. })));
        assert_eq!(client.phase().await, SessionPhase::Authenticated);
        assert_eq!(client.user().await.unwrap().id, "worker-1");
        assert_eq!(client.orders().await.unwrap().source, DataSource::Cache);
        assert_eq!(backend.calls_to(Method::Get, "orders"), 1);
    }

    #[tokio::test]
    async fn polling_starts_once_and_stops() {
        let client = client(Arc::new(ScriptedBackend::new()));
        assert!(!client.is_polling());

        client.start_polling();
        client.start_polling();
        assert!(client.is_polling());

        client.shutdown();
        assert!(!client.is_polling());
    }
}
