//! Ingested text chunks grouped by owning document
//!
//! The corpus is the source of truth for chunk text. The vector index is
//! refreshed from it, and the lexical and keyword retrieval tiers read it
//! directly.

use crate::error::{LecternError, Result};
use crate::storage::atomic_write;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Identifier assigned to a document by the ingesting collaborator
pub type DocumentId = i64;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Corpus {
    documents: BTreeMap<DocumentId, Vec<String>>,
    /// Bumped on every mutation so dependent caches can tell they are stale
    #[serde(skip)]
    revision: u64,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the chunks of `document_id`, returning the previous chunk count
    pub fn ingest(&mut self, document_id: DocumentId, chunks: Vec<String>) -> Option<usize> {
        self.revision += 1;
        self.documents
            .insert(document_id, chunks)
            .map(|previous| previous.len())
    }

    pub fn remove_document(&mut self, document_id: DocumentId) -> bool {
        let removed = self.documents.remove(&document_id).is_some();
        if removed {
            self.revision += 1;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.documents.clear();
        self.revision += 1;
    }

    pub fn chunks(&self, document_id: DocumentId) -> Option<&[String]> {
        self.documents.get(&document_id).map(|c| c.as_slice())
    }

    /// All chunks of a document joined with single spaces
    pub fn document_text(&self, document_id: DocumentId) -> Option<String> {
        self.documents.get(&document_id).map(|c| c.join(" "))
    }

    pub fn contains(&self, document_id: DocumentId) -> bool {
        self.documents.contains_key(&document_id)
    }

    pub fn document_ids(&self) -> impl Iterator<Item = DocumentId> + '_ {
        self.documents.keys().copied()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.documents.values().map(|c| c.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec(self).map_err(|e| LecternError::Json {
            source: e,
            context: "Failed to encode corpus".to_string(),
        })?;
        atomic_write(path, &bytes).map_err(|e| LecternError::Io {
            source: e,
            context: format!("Failed to write corpus: {}", path.display()),
        })
    }

    /// Load a saved corpus; a missing file yields an empty corpus
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path).map_err(|e| LecternError::Io {
            source: e,
            context: format!("Failed to read corpus: {}", path.display()),
        })?;
        let mut corpus: Corpus = serde_json::from_slice(&bytes).map_err(|e| LecternError::Json {
            source: e,
            context: format!("Failed to parse corpus: {}", path.display()),
        })?;
        corpus.revision = 1;
        Ok(corpus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ingest_replaces_document() {
        let mut corpus = Corpus::new();
        assert_eq!(corpus.ingest(1, vec!["a".into(), "b".into()]), None);
        assert_eq!(corpus.ingest(1, vec!["c".into()]), Some(2));

        assert_eq!(corpus.chunks(1).unwrap(), ["c".to_string()]);
        assert_eq!(corpus.chunk_count(), 1);
        assert_eq!(corpus.revision(), 2);
    }

    #[test]
    fn test_document_text_joins_chunks() {
        let mut corpus = Corpus::new();
        corpus.ingest(4, vec!["first part.".into(), "second part.".into()]);
        assert_eq!(
            corpus.document_text(4).unwrap(),
            "first part. second part."
        );
        assert!(corpus.document_text(5).is_none());
    }

    #[test]
    fn test_remove_and_clear_bump_revision() {
        let mut corpus = Corpus::new();
        corpus.ingest(1, vec!["x".into()]);
        corpus.ingest(2, vec!["y".into()]);

        let before = corpus.revision();
        assert!(corpus.remove_document(1));
        assert!(!corpus.remove_document(1));
        assert_eq!(corpus.revision(), before + 1);

        corpus.clear();
        assert!(corpus.is_empty());
        assert_eq!(corpus.revision(), before + 2);
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("corpus.json");

        let mut corpus = Corpus::new();
        corpus.ingest(3, vec!["persisted chunk".into()]);
        corpus.save(&path).unwrap();

        let loaded = Corpus::load(&path).unwrap();
        assert_eq!(loaded.document_ids().collect::<Vec<_>>(), vec![3]);
        assert_eq!(loaded.chunks(3).unwrap(), ["persisted chunk".to_string()]);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let temp = TempDir::new().unwrap();
        let corpus = Corpus::load(&temp.path().join("none.json")).unwrap();
        assert!(corpus.is_empty());
    }
}
