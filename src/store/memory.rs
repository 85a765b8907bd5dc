//! In-process store, for ephemeral runs and tests.

use super::{DocumentStore, Result};
use crate::polls::Document;
use parking_lot::Mutex;

/// Keeps the document in memory; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Mutex<Option<Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing document.
    pub fn with_document(document: Document) -> Self {
        Self {
            document: Mutex::new(Some(document)),
        }
    }
}

impl DocumentStore for MemoryStore {
    fn load(&self) -> Result<Document> {
        let mut slot = self.document.lock();
        Ok(slot.get_or_insert_with(Document::new).clone())
    }

    fn save(&self, document: &Document) -> Result<()> {
        *self.document.lock() = Some(document.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
