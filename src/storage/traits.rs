//! Storage Trait Definitions
//!
//! The bridge persists its state as an opaque key-value repository. Each
//! invocation reads the keys it needs and writes every change back as one
//! atomic batch.

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// One write of a batch: `Some` stores a value, `None` deletes the key
pub type BatchEntry = (String, Option<String>);

/// Key-value repository for bridge state
///
/// Implementations:
/// - `SqliteStore` - Production storage with SQLite
/// - `MemoryStore` - In-memory storage for testing
pub trait BridgeStore {
    /// Get the value stored under a key
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Apply every entry or none of them
    fn write_batch(&self, batch: &[BatchEntry]) -> StorageResult<()>;

    /// All stored keys, in ascending order
    fn keys(&self) -> StorageResult<Vec<String>>;
}
