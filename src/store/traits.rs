//! `CredentialStore` trait, the single async interface for local persistence.

use async_trait::async_trait;

use crate::error::StorageError;

/// Durable, device-scoped key/value storage.
///
/// Implementations must survive process restarts; the session is restored
/// from here on cold start. Absence is reported as `Ok(None)`, never as an
/// error.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Insert or overwrite a value.
    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Write several entries so that either all or none become visible.
    async fn put_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError>;

    /// Delete several entries together.
    async fn remove_all(&self, keys: &[&str]) -> Result<(), StorageError>;
}
