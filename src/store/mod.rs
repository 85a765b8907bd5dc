//! State Store
//!
//! Durable holder of the single poll [`Document`]. Implementations are
//! synchronous and always replace the whole document; a load of a missing or
//! corrupt copy self-heals to an empty document instead of failing.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::polls::Document;
use std::sync::Arc;
use thiserror::Error;

/// Store error types. Corruption is never reported; only failures to read or
/// write the durable copy are.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable load/save of the poll document.
pub trait DocumentStore: Send + Sync {
    /// Return the last saved document, initializing an empty one if there is
    /// no valid durable copy.
    fn load(&self) -> Result<Document>;

    /// Overwrite the durable copy. Readers never observe a partial write.
    fn save(&self, document: &Document) -> Result<()>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Build the store selected by configuration.
pub fn open(config: &StoreConfig) -> Arc<dyn DocumentStore> {
    match config.backend {
        StoreBackend::File => Arc::new(FileStore::new(&config.path)),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    }
}
