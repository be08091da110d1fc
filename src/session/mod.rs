//! Session state: the in-memory credential and its durable backing.
//!
//! Phases: Anonymous → Authenticating → Authenticated → Anonymous.
//!
//! The [`Session`] is the only owner of the bearer token. Memory is updated
//! first so that requests issued after a purge see the anonymous state
//! immediately; the credential store is updated under `store_guard` so a purge
//! and a concurrent login never interleave their writes.

pub mod manager;

pub use manager::SessionManager;

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{info, warn};

use crate::error::{AuthError, StorageError};
use crate::model::User;
use crate::store::{AUTH_TOKEN_KEY, CredentialStore, USER_KEY};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 16;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Anonymous,
    Authenticating,
    Authenticated,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Anonymous => "anonymous",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
        };
        write!(f, "{s}")
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    /// The worker logged out.
    Logout,
    /// The server rejected the credential (401).
    Expired,
}

/// Session transitions, fanned out to every screen.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SignedIn { user: User },
    SignedOut { reason: SignOutReason },
}

struct Credential {
    token: SecretString,
    user: User,
    generation: u64,
}

struct SessionState {
    phase: SessionPhase,
    credential: Option<Credential>,
    /// Bumped every time a credential is installed.
    generation: u64,
}

impl SessionState {
    fn settled_phase(&self) -> SessionPhase {
        if self.credential.is_some() {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Anonymous
        }
    }
}

/// Shared credential holder consulted by the transport middleware.
pub struct Session {
    store: Arc<dyn CredentialStore>,
    state: RwLock<SessionState>,
    store_guard: Mutex<()>,
    tx: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self {
            store,
            state: RwLock::new(SessionState {
                phase: SessionPhase::Anonymous,
                credential: None,
                generation: 0,
            }),
            store_guard: Mutex::new(()),
            tx,
        }
    }

    /// Subscribe to sign-in / sign-out events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub async fn phase(&self) -> SessionPhase {
        self.state.read().await.phase
    }

    pub async fn is_authenticated(&self) -> bool {
        self.phase().await == SessionPhase::Authenticated
    }

    /// Profile of the signed-in worker.
    pub async fn user(&self) -> Option<User> {
        self.state
            .read()
            .await
            .credential
            .as_ref()
            .map(|c| c.user.clone())
    }

    /// Current bearer token and the generation it belongs to.
    pub async fn bearer(&self) -> Option<(SecretString, u64)> {
        self.state
            .read()
            .await
            .credential
            .as_ref()
            .map(|c| (SecretString::from(c.token.expose_secret()), c.generation))
    }

    /// Enter `Authenticating`. Only one login may run at a time.
    pub async fn begin_login(&self) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        if state.phase == SessionPhase::Authenticating {
            return Err(AuthError::LoginInProgress);
        }
        state.phase = SessionPhase::Authenticating;
        Ok(())
    }

    /// Leave `Authenticating` without installing anything.
    pub async fn abort_login(&self) {
        let mut state = self.state.write().await;
        if state.phase == SessionPhase::Authenticating {
            state.phase = state.settled_phase();
        }
    }

    /// Persist token and profile together, then switch to `Authenticated`.
    ///
    /// Nothing is installed in memory unless both entries were written.
    pub async fn establish(&self, token: SecretString, user: User) -> Result<(), StorageError> {
        let user_json = match serde_json::to_string(&user) {
            Ok(json) => json,
            Err(e) => {
                self.abort_login().await;
                return Err(StorageError::Serialization(e.to_string()));
            }
        };

        let _guard = self.store_guard.lock().await;

        if let Err(e) = self
            .store
            .put_all(&[(AUTH_TOKEN_KEY, token.expose_secret()), (USER_KEY, user_json.as_str())])
            .await
        {
            if let Err(cleanup) = self.store.remove_all(&[AUTH_TOKEN_KEY, USER_KEY]).await {
                warn!(error = %cleanup, "Failed to clean up after credential write error");
            }
            self.abort_login().await;
            return Err(e);
        }

        self.install(token, user.clone()).await;
        info!(user_id = %user.id, "Session established");
        let _ = self.tx.send(SessionEvent::SignedIn { user });
        Ok(())
    }

    /// Cold start: trust a stored credential without a round-trip.
    ///
    /// A token without a profile (or an unreadable profile) is treated as
    /// corrupt and purged.
    pub async fn restore(&self) -> Result<Option<User>, StorageError> {
        let token = self.store.get(AUTH_TOKEN_KEY).await?;
        let user_raw = self.store.get(USER_KEY).await?;

        let (token, user_raw) = match (token, user_raw) {
            (Some(token), Some(user_raw)) => (token, user_raw),
            (None, None) => return Ok(None),
            _ => {
                warn!("Credential store holds a partial session, discarding it");
                self.store.remove_all(&[AUTH_TOKEN_KEY, USER_KEY]).await?;
                return Ok(None);
            }
        };

        let user: User = match serde_json::from_str(&user_raw) {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "Stored profile is unreadable, discarding session");
                self.store.remove_all(&[AUTH_TOKEN_KEY, USER_KEY]).await?;
                return Ok(None);
            }
        };

        self.install(SecretString::from(token), user.clone()).await;
        info!(user_id = %user.id, "Session restored from credential store");
        let _ = self.tx.send(SessionEvent::SignedIn { user: user.clone() });
        Ok(Some(user))
    }

    /// End the session unconditionally. Never fails: a store error is logged
    /// and the in-memory state is still cleared.
    pub async fn sign_out(&self, reason: SignOutReason) {
        let generation = {
            let mut state = self.state.write().await;
            state.credential = None;
            state.phase = SessionPhase::Anonymous;
            state.generation
        };
        self.purge_store(generation).await;
        info!(reason = ?reason, "Session ended");
        let _ = self.tx.send(SessionEvent::SignedOut { reason });
    }

    /// End the session only if `generation` is still the live credential.
    ///
    /// Returns whether a purge happened. Repeated calls for the same
    /// generation are no-ops.
    pub async fn sign_out_if_current(&self, generation: u64, reason: SignOutReason) -> bool {
        {
            let mut state = self.state.write().await;
            match &state.credential {
                Some(credential) if credential.generation == generation => {}
                _ => return false,
            }
            state.credential = None;
            if state.phase == SessionPhase::Authenticated {
                state.phase = SessionPhase::Anonymous;
            }
        }
        self.purge_store(generation).await;
        let _ = self.tx.send(SessionEvent::SignedOut { reason });
        true
    }

    async fn install(&self, token: SecretString, user: User) {
        let mut state = self.state.write().await;
        state.generation += 1;
        state.credential = Some(Credential {
            token,
            user,
            generation: state.generation,
        });
        state.phase = SessionPhase::Authenticated;
    }

    /// Remove the durable credential unless a newer one has been installed
    /// since `generation`.
    async fn purge_store(&self, generation: u64) {
        let _guard = self.store_guard.lock().await;
        if self.state.read().await.generation != generation {
            return;
        }
        if let Err(e) = self.store.remove_all(&[AUTH_TOKEN_KEY, USER_KEY]).await {
            warn!(error = %e, "Failed to purge credential store");
        }
    }
}
