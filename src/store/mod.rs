//! Credential persistence: durable key/value storage for the session.

pub mod libsql_backend;
pub mod memory;
pub mod traits;

pub use libsql_backend::LibSqlCredentialStore;
pub use memory::MemoryCredentialStore;
pub use traits::CredentialStore;

/// Key holding the opaque bearer token.
pub const AUTH_TOKEN_KEY: &str = "auth_token";

/// Key holding the serialized [`User`](crate::model::User) profile.
pub const USER_KEY: &str = "user";
