//! ETag Store: file-per-artifact persistence keyed by the cache's
//! canonical on-disk path.
//!
//! The ETag file for a cached file at `<cache_root>/models/<rel>` lives
//! at `<cache_root>/etags/<rel>`. Write is create-or-replace; concurrent
//! writers for the same key last-write-wins (no locking across writes).

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub struct EtagStore {
    models_root: PathBuf,
    etags_root: PathBuf,
}

impl EtagStore {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        let cache_root = cache_root.into();
        Self {
            models_root: cache_root.join("models"),
            etags_root: cache_root.join("etags"),
        }
    }

    /// The canonical on-disk path of a cached file, as reported by the
    /// Cache View, maps to a sibling path under the etag root.
    fn etag_path_for(&self, cached_file_path: &Path) -> Option<PathBuf> {
        let rel = cached_file_path.strip_prefix(&self.models_root).ok()?;
        Some(self.etags_root.join(rel))
    }

    pub async fn load(&self, cached_file_path: &Path) -> Option<String> {
        let path = self.etag_path_for(cached_file_path)?;
        let mut file = tokio::fs::File::open(&path).await.ok()?;
        let mut buf = String::new();
        file.read_to_string(&mut buf).await.ok()?;
        let trimmed = buf.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    pub async fn save(&self, cached_file_path: &Path, etag: &str) -> anyhow::Result<()> {
        let path = self
            .etag_path_for(cached_file_path)
            .ok_or_else(|| anyhow::anyhow!("path {cached_file_path:?} is not under the cache's models root"))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(etag.as_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_with_trailing_whitespace_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let store = EtagStore::new(dir.path());
        let file_path = dir.path().join("models/org/m/snapshots/abc/m.bin");

        store.save(&file_path, "W/\"etag-value\"\n").await.unwrap();
        let loaded = store.load(&file_path).await.unwrap();
        assert_eq!(loaded, "W/\"etag-value\"");
    }

    #[tokio::test]
    async fn missing_key_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = EtagStore::new(dir.path());
        let file_path = dir.path().join("models/org/m/snapshots/abc/m.bin");
        assert!(store.load(&file_path).await.is_none());
    }

    #[tokio::test]
    async fn write_is_create_or_replace() {
        let dir = tempfile::tempdir().unwrap();
        let store = EtagStore::new(dir.path());
        let file_path = dir.path().join("models/org/m/snapshots/abc/m.bin");

        store.save(&file_path, "first").await.unwrap();
        store.save(&file_path, "second").await.unwrap();
        assert_eq!(store.load(&file_path).await.unwrap(), "second");
    }
}
