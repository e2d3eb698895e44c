//! Corpus snapshots and the loader seam.
//!
//! A corpus snapshot is the full set of documents the index should reflect:
//! one [`Document`] per identity. The snapshot is produced by a
//! [`CorpusLoader`] collaborator; the index manager only reads it. What the
//! loader walks — a directory, an object store, a CMS export — is its own
//! business, which is why the manager depends on the trait and not on any
//! concrete loader.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::LoadError;

/// One document in a corpus snapshot.
///
/// The identity must be stable across snapshots (e.g. a relative path): it is
/// the key under which fingerprints and vectors are tracked. The revision
/// marker is opaque metadata from the source (a modification time, an etag)
/// and plays no part in change detection — content fingerprints do that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identity, unique within a snapshot.
    pub id: String,
    /// Raw text content.
    pub text: String,
    /// Opaque source revision marker, if the loader provides one.
    pub revision: Option<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            revision: None,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }
}

/// Produces corpus snapshots for the index manager.
#[async_trait]
pub trait CorpusLoader: Send + Sync {
    /// Load the current snapshot: one entry per identity.
    async fn load(&self) -> Result<Vec<Document>, LoadError>;
}

/// Loads text documents from a directory tree.
///
/// Walks the root with the `ignore` crate (so `.gitignore` and hidden-file
/// conventions apply), reads files with matching extensions, and uses the
/// path relative to the root as the document identity. Files that are not
/// valid UTF-8 are skipped with a warning rather than failing the snapshot.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
    extensions: Vec<String>,
}

impl DirectoryLoader {
    /// Create a loader for markdown and plain-text files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: ["md", "markdown", "txt"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    /// Replace the set of file extensions considered part of the corpus.
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|e| e.to_string()).collect();
        self
    }

    fn wants(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
    }

    fn load_blocking(&self) -> Result<Vec<Document>, LoadError> {
        if !self.root.is_dir() {
            return Err(LoadError::source_unavailable(format!(
                "corpus root {} is not a directory",
                self.root.display()
            )));
        }

        let mut documents = Vec::new();
        for entry in ignore::WalkBuilder::new(&self.root).build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable corpus entry: {e}");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_some_and(|t| t.is_file()) || !self.wants(path) {
                continue;
            }

            let text = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Skipping {}: {e}", path.display());
                    continue;
                }
            };

            let id = path
                .strip_prefix(&self.root)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string();

            let revision = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs().to_string());

            let mut document = Document::new(id, text);
            document.revision = revision;
            documents.push(document);
        }

        // Walk order is platform-dependent; snapshots should not be.
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }
}

#[async_trait]
impl CorpusLoader for DirectoryLoader {
    async fn load(&self) -> Result<Vec<Document>, LoadError> {
        let loader = self.clone();
        tokio::task::spawn_blocking(move || loader.load_blocking())
            .await
            .map_err(|e| LoadError::source_unavailable(format!("loader task failed: {e}")))?
    }
}
