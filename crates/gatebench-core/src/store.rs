//! Persisted result document.
//!
//! The document maps a lower-cased target name to that target's latest [`RunSummary`].
//! Entries are kept as raw JSON values so that targets written by other versions of the
//! tool survive a merge byte-for-byte.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BenchError, Result};
use crate::types::RunSummary;

/// Target name → latest summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultDocument {
    entries: BTreeMap<String, serde_json::Value>,
}

impl ResultDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for `name` (lower-cased) with `summary`, leaving every other entry untouched
    pub fn merge(&mut self, name: &str, summary: &RunSummary) -> Result<()> {
        let value = serde_json::to_value(summary)?;
        self.entries.insert(name.to_lowercase(), value);
        Ok(())
    }

    /// Typed view of an entry; `None` if absent or written in an incompatible shape
    pub fn get(&self, name: &str) -> Option<RunSummary> {
        self.entries
            .get(&name.to_lowercase())
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn raw(&self, name: &str) -> Option<&serde_json::Value> {
        self.entries.get(&name.to_lowercase())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read-merge-write access to the result file
#[derive(Debug, Clone)]
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the existing document.
    ///
    /// A missing file yields an empty document. An unreadable or unparsable file is
    /// logged and discarded.
    pub fn load(&self) -> ResultDocument {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No existing results file");
                return ResultDocument::new();
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    "Could not read existing results file: {}", e
                );
                return ResultDocument::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(document) => document,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    "Could not parse existing results file, starting fresh: {}", e
                );
                ResultDocument::new()
            }
        }
    }

    /// Write the whole document, pretty-printed
    pub fn save(&self, document: &ResultDocument) -> Result<()> {
        let json = serde_json::to_string_pretty(document)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| BenchError::ResultWrite {
                path: self.path.clone(),
                source,
            })?;
        }

        std::fs::write(&self.path, json).map_err(|source| BenchError::ResultWrite {
            path: self.path.clone(),
            source,
        })?;

        info!(path = %self.path.display(), targets = document.len(), "Results saved");
        Ok(())
    }

    /// Read the current document, replace `name`'s entry and write it back
    pub fn merge_and_save(&self, name: &str, summary: &RunSummary) -> Result<ResultDocument> {
        let mut document = self.load();
        document.merge(name, summary)?;
        self.save(&document)?;
        Ok(document)
    }
}
