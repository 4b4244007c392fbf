//! Storage Layer Module
//!
//! Provides persistence for bridge state.
//!
//! This module contains:
//! - Storage trait definition for abstraction
//! - SQLite implementation for production
//! - In-memory implementation for testing
//! - The `BridgeState` aggregate and its versioned JSON layout

pub mod memory;
pub mod sqlite;
pub mod state;
pub mod traits;

// Re-exports for convenience
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use state::{transact, BridgeState};
pub use traits::{BatchEntry, BridgeStore, StorageError, StorageResult};
