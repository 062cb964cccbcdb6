//! Storage layout and crash-safe file writes
//!
//! Everything Lectern persists lives under one data directory:
//! `store/` holds the vector index artifacts and the chunk corpus.

use crate::error::{LecternError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Resolves on-disk locations under the data directory
#[derive(Debug, Clone)]
pub struct StorageLayout {
    base_path: PathBuf,
    index_name: String,
}

impl StorageLayout {
    /// Create the layout, making sure the store directory exists
    pub fn new(base_path: PathBuf, index_name: impl Into<String>) -> Result<Self> {
        let layout = Self {
            base_path,
            index_name: index_name.into(),
        };

        let store = layout.store_dir();
        std::fs::create_dir_all(&store).map_err(|e| LecternError::Io {
            source: e,
            context: format!("Failed to create store directory: {}", store.display()),
        })?;

        Ok(layout)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Internal, rebuildable data
    pub fn store_dir(&self) -> PathBuf {
        self.base_path.join("store")
    }

    /// Path stem shared by the vector blob and its metadata
    pub fn index_stem(&self) -> PathBuf {
        self.store_dir().join(&self.index_name)
    }

    pub fn corpus_path(&self) -> PathBuf {
        self.store_dir().join("corpus.json")
    }
}

/// Append a suffix to the final path component (`store/index` -> `store/index.vectors`)
pub fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
    let mut name = stem
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    stem.with_file_name(name)
}

/// Write `bytes` to `path` via a temp file in the same directory plus rename.
///
/// Readers see either the old file or the complete new one, never a torn write.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp = with_suffix(path, &format!(".tmp-{}", std::process::id()));
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Hex BLAKE3 digest used to tie persisted artifacts together
pub fn checksum(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_creates_store_dir() {
        let temp = TempDir::new().unwrap();
        let layout = StorageLayout::new(temp.path().to_path_buf(), "vector_store").unwrap();

        assert!(layout.store_dir().exists());
        assert_eq!(
            layout.index_stem(),
            temp.path().join("store").join("vector_store")
        );
        assert_eq!(
            layout.corpus_path(),
            temp.path().join("store").join("corpus.json")
        );
    }

    #[test]
    fn test_with_suffix_keeps_dots() {
        let stem = Path::new("/data/store/index.v2");
        assert_eq!(
            with_suffix(stem, ".vectors"),
            PathBuf::from("/data/store/index.v2.vectors")
        );
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("file.bin");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_checksum_is_stable() {
        assert_eq!(checksum(b"abc"), checksum(b"abc"));
        assert_ne!(checksum(b"abc"), checksum(b"abd"));
    }
}
