//! Login / logout / cold-start lifecycle on top of [`Session`].

use std::sync::Arc;

use secrecy::SecretString;
use tracing::{info, warn};

use super::{Session, SessionPhase, SignOutReason};
use crate::api::ApiClient;
use crate::error::{AuthError, Error};
use crate::model::User;

/// Drives the session state machine against the login endpoint.
pub struct SessionManager {
    session: Arc<Session>,
    api: Arc<ApiClient>,
}

impl SessionManager {
    pub fn new(session: Arc<Session>, api: Arc<ApiClient>) -> Self {
        Self { session, api }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub async fn phase(&self) -> SessionPhase {
        self.session.phase().await
    }

    /// Authenticate and persist the credential.
    ///
    /// Empty fields are rejected before any network call. On any failure the
    /// session returns to its previous settled phase and nothing new is
    /// persisted.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, Error> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials.into());
        }

        self.session.begin_login().await?;

        let response = match self.api.login(email, password).await {
            Ok(response) => response,
            Err(e) => {
                self.session.abort_login().await;
                warn!(error = %e, "Login failed");
                return Err(AuthError::from(e).into());
            }
        };

        let user = response.user;
        self.session
            .establish(SecretString::from(response.token), user.clone())
            .await?;
        info!(user_id = %user.id, email = %user.email, "Logged in");
        Ok(user)
    }

    /// Forget the credential. Always succeeds locally.
    pub async fn logout(&self) {
        self.session.sign_out(SignOutReason::Logout).await;
    }

    /// Cold start: restore a stored credential without contacting the server.
    /// Validity is confirmed by the next authenticated call.
    pub async fn restore_session(&self) -> Result<Option<User>, Error> {
        Ok(self.session.restore().await?)
    }
}
