//! Durable key-value storage backing the offline queue
//!
//! The queue only needs four primitives from its store: point reads, point
//! writes, deletes and a key listing. Any persistent store that can offer
//! those is acceptable; this module ships a SQLite backend for devices and an
//! in-memory backend for tests and throwaway sessions.

use async_trait::async_trait;

pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors raised by a storage backend
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("failed to encode or decode stored value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Generic async key-value interface
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` if the key is absent
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Insert or overwrite a value
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List every stored key
    async fn list_keys(&self) -> Result<Vec<String>, StorageError>;

    /// List the keys starting with `prefix`
    ///
    /// Backends that can filter natively should override this.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let keys = self.list_keys().await?;
        Ok(keys.into_iter().filter(|k| k.starts_with(prefix)).collect())
    }
}
