//! Error types for the worker client.

use std::fmt;

/// Top-level error type for the client core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Data integrity error: {0}")]
    DataIntegrity(#[from] DataIntegrityError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

impl Error {
    /// Lift a transport failure from an authenticated call, turning the
    /// session-level ones into [`AuthError`]s.
    pub fn from_transport(err: TransportError) -> Self {
        if err.is_unauthorized() {
            AuthError::SessionExpired.into()
        } else if err.kind == TransportErrorKind::NoCredential {
            AuthError::NotAuthenticated.into()
        } else {
            Self::Transport(err)
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Authentication and session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Email and password are both required")]
    MissingCredentials,

    #[error("Login failed: {reason}")]
    LoginFailed { reason: String },

    #[error("A login is already in progress")]
    LoginInProgress,

    #[error("Session expired, please log in again")]
    SessionExpired,

    #[error("Not authenticated")]
    NotAuthenticated,
}

/// What went wrong on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection refused, DNS failure, reset, etc.
    Network,
    /// The call exceeded the configured timeout.
    Timeout,
    /// The server answered with a non-2xx status.
    Status,
    /// A 2xx body that could not be decoded.
    Decode,
    /// An authenticated call was attempted without a credential.
    NoCredential,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Status => "status",
            Self::Decode => "decode",
            Self::NoCredential => "no_credential",
        };
        write!(f, "{s}")
    }
}

/// Single error shape for every HTTP failure: network, timeout, non-2xx.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} failure{}: {cause}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub status: Option<u16>,
    pub cause: String,
}

impl TransportError {
    pub fn network(cause: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Network,
            status: None,
            cause: cause.into(),
        }
    }

    pub fn timeout(cause: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            status: None,
            cause: cause.into(),
        }
    }

    pub fn status(status: u16, cause: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Status,
            status: Some(status),
            cause: cause.into(),
        }
    }

    pub fn decode(cause: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Decode,
            status: None,
            cause: cause.into(),
        }
    }

    pub fn no_credential() -> Self {
        Self {
            kind: TransportErrorKind::NoCredential,
            status: None,
            cause: "no credential available for an authenticated call".to_string(),
        }
    }

    /// The server rejected the bearer credential.
    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(401)
    }

    /// Failures that mean the caller has no valid session.
    pub fn is_auth_failure(&self) -> bool {
        self.is_unauthorized() || self.kind == TransportErrorKind::NoCredential
    }
}

/// Server data that breaks a client-side invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataIntegrityError {
    #[error("Multiple orders accepted at once: {ids:?}")]
    MultipleAccepted { ids: Vec<String> },

    #[error("Order {id} appears more than once in the orders list")]
    DuplicateOrder { id: String },
}

/// Local persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to open credential store: {0}")]
    Open(String),

    #[error("Credential store query failed: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Job lifecycle violations detected before a mutation is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("Job {active} is already active, cannot accept {requested}")]
    AlreadyActive { active: String, requested: String },

    #[error("Order {id} is {status}, only accepted jobs can be completed")]
    NotAccepted { id: String, status: String },
}

impl From<TransportError> for AuthError {
    fn from(err: TransportError) -> Self {
        if err.is_unauthorized() {
            Self::LoginFailed {
                reason: "invalid email or password".to_string(),
            }
        } else {
            Self::LoginFailed {
                reason: err.to_string(),
            }
        }
    }
}

/// Result type alias for the client core.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_display_includes_status() {
        let err = TransportError::status(503, "service unavailable");
        assert_eq!(err.to_string(), "status failure (HTTP 503): service unavailable");

        let err = TransportError::timeout("deadline elapsed");
        assert_eq!(err.to_string(), "timeout failure: deadline elapsed");
    }

    #[test]
    fn unauthorized_detection() {
        assert!(TransportError::status(401, "nope").is_unauthorized());
        assert!(!TransportError::status(403, "nope").is_unauthorized());
        assert!(TransportError::no_credential().is_auth_failure());
        assert!(!TransportError::network("reset").is_auth_failure());
    }

    #[test]
    fn authenticated_call_failures_become_auth_errors() {
        assert!(matches!(
            Error::from_transport(TransportError::status(401, "expired")),
            Error::Auth(AuthError::SessionExpired)
        ));
        assert!(matches!(
            Error::from_transport(TransportError::no_credential()),
            Error::Auth(AuthError::NotAuthenticated)
        ));
        assert!(matches!(
            Error::from_transport(TransportError::status(500, "boom")),
            Error::Transport(_)
        ));
    }

    #[test]
    fn login_401_maps_to_bad_credentials() {
        let err: AuthError = TransportError::status(401, "Incorrect email or password").into();
        assert_eq!(
            err,
            AuthError::LoginFailed {
                reason: "invalid email or password".to_string()
            }
        );
    }
}
