//! JSON file store.

use super::{DocumentStore, Result};
use crate::polls::Document;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default file name for the persisted document.
pub const DEFAULT_DATA_FILE: &str = "poll_data.json";

/// Stores the document as indented JSON in a single file.
///
/// Saves go through a sibling `<name>.tmp` file that is fsynced and renamed
/// over the target.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_DATA_FILE.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn reinitialize(&self, reason: &str) -> Result<Document> {
        warn!(
            path = %self.path.display(),
            reason = %reason,
            "discarding unreadable poll data, starting empty"
        );
        let document = Document::new();
        self.save(&document)?;
        Ok(document)
    }
}

impl DocumentStore for FileStore {
    fn load(&self) -> Result<Document> {
        let raw = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no poll data found, initializing");
                let document = Document::new();
                self.save(&document)?;
                return Ok(document);
            }
            Err(e) => return Err(e.into()),
        };

        let document = match serde_json::from_slice::<Document>(&raw) {
            Ok(document) => document,
            Err(e) => return self.reinitialize(&e.to_string()),
        };
        if let Err(violation) = document.validate() {
            return self.reinitialize(&violation.to_string());
        }
        Ok(document)
    }

    fn save(&self, document: &Document) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut body = serde_json::to_string_pretty(document)?;
        body.push('\n');

        let tmp = self.temp_path();
        {
            let mut file = File::create(&tmp)?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}
