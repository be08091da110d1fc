//! libSQL-backed durable `CredentialStore`.
//!
//! One `credentials` table keyed by name. Supports local file and in-memory
//! databases; the file variant is what survives a restart.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use super::traits::CredentialStore;
use crate::error::StorageError;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS credentials (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
"#;

const UPSERT: &str = "INSERT INTO credentials (key, value, updated_at) VALUES (?1, ?2, ?3) \
     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

/// libSQL credential store.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlCredentialStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlCredentialStore {
    /// Open (or create) a local database file.
    pub async fn new_local(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Open(format!("Failed to create data directory: {e}"))
                })?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StorageError::Open(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db)?;
        store.init_schema().await?;
        info!(path = %path.display(), "Credential store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StorageError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StorageError::Open(format!("Failed to create in-memory database: {e}")))?;

        let store = Self::from_database(db)?;
        store.init_schema().await?;
        Ok(store)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, StorageError> {
        let conn = db
            .connect()
            .map_err(|e| StorageError::Open(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        self.conn
            .execute_batch(SCHEMA)
            .await
            .map_err(|e| StorageError::Open(format!("init_schema: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for LibSqlCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut rows = self
            .conn
            .query("SELECT value FROM credentials WHERE key = ?1", params![key])
            .await
            .map_err(|e| StorageError::Query(format!("get: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value: String = row
                    .get(0)
                    .map_err(|e| StorageError::Query(format!("get row parse: {e}")))?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StorageError::Query(format!("get: {e}"))),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(UPSERT, params![key, value, now])
            .await
            .map_err(|e| StorageError::Query(format!("put: {e}")))?;
        debug!(key, "Credential entry written");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.conn
            .execute("DELETE FROM credentials WHERE key = ?1", params![key])
            .await
            .map_err(|e| StorageError::Query(format!("remove: {e}")))?;
        debug!(key, "Credential entry removed");
        Ok(())
    }

    async fn put_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| StorageError::Query(format!("put_all begin: {e}")))?;

        for (key, value) in entries {
            // Dropping `tx` on error rolls the whole batch back.
            tx.execute(UPSERT, params![*key, *value, now.as_str()])
                .await
                .map_err(|e| StorageError::Query(format!("put_all: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Query(format!("put_all commit: {e}")))?;
        debug!(count = entries.len(), "Credential entries written");
        Ok(())
    }

    async fn remove_all(&self, keys: &[&str]) -> Result<(), StorageError> {
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| StorageError::Query(format!("remove_all begin: {e}")))?;

        for key in keys {
            tx.execute("DELETE FROM credentials WHERE key = ?1", params![*key])
                .await
                .map_err(|e| StorageError::Query(format!("remove_all: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Query(format!("remove_all commit: {e}")))?;
        debug!(count = keys.len(), "Credential entries removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_is_absent() {
        let store = LibSqlCredentialStore::new_memory().await.unwrap();
        assert!(store.get("auth_token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites() {
        let store = LibSqlCredentialStore::new_memory().await.unwrap();
        store.put("auth_token", "first").await.unwrap();
        store.put("auth_token", "second").await.unwrap();
        assert_eq!(store.get("auth_token").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn put_all_and_remove_all() {
        let store = LibSqlCredentialStore::new_memory().await.unwrap();
        store
            .put_all(&[("auth_token", "tok"), ("user", r#"{"id":"w1"}"#)])
            .await
            .unwrap();
        assert_eq!(store.get("user").await.unwrap().as_deref(), Some(r#"{"id":"w1"}"#));

        store.remove_all(&["auth_token", "user"]).await.unwrap();
        assert!(store.get("auth_token").await.unwrap().is_none());
        assert!(store.get("user").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("creds.db");

        {
            let store = LibSqlCredentialStore::new_local(&path).await.unwrap();
            store.put("auth_token", "persisted").await.unwrap();
        }

        let reopened = LibSqlCredentialStore::new_local(&path).await.unwrap();
        assert_eq!(
            reopened.get("auth_token").await.unwrap().as_deref(),
            Some("persisted")
        );
    }
}
