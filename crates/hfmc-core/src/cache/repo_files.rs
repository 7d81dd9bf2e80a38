//! Repo File List store: the full list of files belonging to a single
//! resolved revision, persisted once a [`crate::fetch`] pass over every
//! file in that revision has completed.

use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub struct RepoFileListStore {
    root: PathBuf,
}

impl RepoFileListStore {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            root: cache_root.into().join("repo_files"),
        }
    }

    fn list_path(&self, repo_id: &str, commit_hash: &str) -> PathBuf {
        self.root.join(repo_id).join(commit_hash).join("files.json")
    }

    pub async fn load(&self, repo_id: &str, commit_hash: &str) -> Option<Vec<String>> {
        let path = self.list_path(repo_id, commit_hash);
        let mut file = tokio::fs::File::open(&path).await.ok()?;
        let mut buf = String::new();
        file.read_to_string(&mut buf).await.ok()?;
        serde_json::from_str(&buf).ok()
    }

    /// Create-or-replace. Callers persist only after every file in
    /// `files` has been fetched and cached: a partially-fetched repo
    /// must never have a file list on disk.
    pub async fn save(&self, repo_id: &str, commit_hash: &str, files: &[String]) -> anyhow::Result<()> {
        let path = self.list_path(repo_id, commit_hash);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec(files)?;
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(&body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_file_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepoFileListStore::new(dir.path());
        let files = vec!["config.json".to_string(), "model.safetensors".to_string()];

        store.save("org/model", "deadbeef", &files).await.unwrap();
        let loaded = store.load("org/model", "deadbeef").await.unwrap();
        assert_eq!(loaded, files);
    }

    #[tokio::test]
    async fn missing_revision_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepoFileListStore::new(dir.path());
        assert!(store.load("org/model", "nope").await.is_none());
    }

    #[tokio::test]
    async fn save_is_create_or_replace() {
        let dir = tempfile::tempdir().unwrap();
        let store = RepoFileListStore::new(dir.path());
        store
            .save("org/model", "deadbeef", &["a.json".to_string()])
            .await
            .unwrap();
        store
            .save("org/model", "deadbeef", &["a.json".to_string(), "b.bin".to_string()])
            .await
            .unwrap();
        let loaded = store.load("org/model", "deadbeef").await.unwrap();
        assert_eq!(loaded.len(), 2);
    }
}
