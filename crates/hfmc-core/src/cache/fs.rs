//! Filesystem-backed [`CacheView`], mirroring the on-disk layout a
//! HuggingFace Hub-style cache directory scanner expects.
//!
//! Layout, rooted at `<cache_root>/models`:
//!
//! ```text
//! models--<org>--<model>/
//!   refs/<ref_name>            -- file containing a commit hash
//!   snapshots/<commit_hash>/<relative file path>  -- symlink or file
//!   blobs/<blob_id>
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use super::{CacheView, CachedFileInfo, RepoInfo, RevisionInfo};

pub struct FsCacheView {
    models_root: PathBuf,
}

impl FsCacheView {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            models_root: cache_root.into().join("models"),
        }
    }

    pub(crate) fn repo_dir_name(repo_id: &str) -> String {
        format!("models--{}", repo_id.replace('/', "--"))
    }

    fn repo_id_from_dir_name(dir_name: &str) -> Option<String> {
        let rest = dir_name.strip_prefix("models--")?;
        Some(rest.replace("--", "/"))
    }

    fn refs(&self, repo_dir: &Path) -> Vec<(String, String)> {
        let refs_dir = repo_dir.join("refs");
        let Ok(entries) = fs::read_dir(&refs_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                let commit = fs::read_to_string(e.path()).ok()?.trim().to_string();
                Some((name, commit))
            })
            .collect()
    }

    fn revisions(&self, repo_dir: &Path) -> Vec<RevisionInfo> {
        let refs = self.refs(repo_dir);
        let snapshots_dir = repo_dir.join("snapshots");
        let Ok(entries) = fs::read_dir(&snapshots_dir) else {
            return Vec::new();
        };

        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| {
                let commit_hash = e.file_name().to_string_lossy().into_owned();
                let matching_refs: Vec<String> = refs
                    .iter()
                    .filter(|(_, c)| *c == commit_hash)
                    .map(|(name, _)| name.clone())
                    .collect();
                let files = list_files_relative(&e.path());
                RevisionInfo {
                    commit_hash,
                    refs: matching_refs,
                    files,
                }
            })
            .collect()
    }
}

fn list_files_relative(snapshot_dir: &Path) -> Vec<String> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<String>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                walk(base, &path, out);
            } else if let Ok(rel) = path.strip_prefix(base) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    let mut out = Vec::new();
    walk(snapshot_dir, snapshot_dir, &mut out);
    out
}

impl CacheView for FsCacheView {
    fn file_info(&self, repo_id: &str, revision: &str, file: &str) -> Option<CachedFileInfo> {
        let rev = self.revision_info(repo_id, revision)?;
        if !rev.files.iter().any(|f| f == file) {
            return None;
        }
        let repo_dir = self.models_root.join(Self::repo_dir_name(repo_id));
        let path = repo_dir.join("snapshots").join(&rev.commit_hash).join(file);
        let metadata = fs::symlink_metadata(&path).ok()?;
        let (size, blob_id) = if metadata.file_type().is_symlink() {
            let target = fs::read_link(&path).ok()?;
            let resolved = if target.is_absolute() {
                target
            } else {
                path.parent()?.join(target)
            };
            let size = fs::metadata(&resolved).ok()?.len();
            let blob_id = resolved.file_name()?.to_string_lossy().into_owned();
            (size, blob_id)
        } else {
            let size = metadata.len();
            (size, rev.commit_hash.clone())
        };
        Some(CachedFileInfo {
            path,
            size,
            blob_id,
        })
    }

    fn revision_info(&self, repo_id: &str, revision: &str) -> Option<RevisionInfo> {
        let repo_dir = self.models_root.join(Self::repo_dir_name(repo_id));
        let revisions = self.revisions(&repo_dir);
        super::resolve_revision(&revisions, revision).cloned()
    }

    fn repo_info(&self, repo_id: &str) -> Option<RepoInfo> {
        let repo_dir = self.models_root.join(Self::repo_dir_name(repo_id));
        if !repo_dir.is_dir() {
            return None;
        }
        Some(RepoInfo {
            repo_id: repo_id.to_string(),
            revisions: self.revisions(&repo_dir),
        })
    }

    fn repo_list(&self) -> Vec<RepoInfo> {
        let Ok(entries) = fs::read_dir(&self.models_root) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                let repo_id = Self::repo_id_from_dir_name(&name)?;
                Some(RepoInfo {
                    revisions: self.revisions(&e.path()),
                    repo_id,
                })
            })
            .collect()
    }
}

impl FsCacheView {
    /// Remove a cached file's snapshot symlink, and its backing blob if
    /// no other snapshot still links to it. Not part of [`CacheView`]:
    /// mutation is a filesystem-adapter concern, not a query-surface one.
    pub fn remove_file(&self, repo_id: &str, revision: &str, file: &str) -> std::io::Result<()> {
        let repo_dir = self.models_root.join(Self::repo_dir_name(repo_id));
        let Some(rev) = self.revision_info(repo_id, revision) else {
            return Ok(());
        };
        let snapshots_dir = repo_dir.join("snapshots");
        let snapshot_dir = snapshots_dir.join(&rev.commit_hash);
        let link_path = snapshot_dir.join(file);

        let blob_path = fs::read_link(&link_path).ok().and_then(|target| {
            if target.is_absolute() {
                Some(target)
            } else {
                link_path.parent().map(|p| p.join(target))
            }
        });

        remove_file_and_prune(&link_path, &snapshots_dir)?;

        if let Some(blob_path) = blob_path {
            if can_delete_blob(file, &snapshots_dir, &blob_path) {
                remove_file_and_prune(&blob_path, &repo_dir.join("blobs"))?;
            }
        }

        if !snapshot_dir.exists() {
            let refs_dir = repo_dir.join("refs");
            for (name, commit) in self.refs(&repo_dir) {
                if commit == rev.commit_hash {
                    let _ = fs::remove_file(refs_dir.join(name));
                }
            }
        }

        Ok(())
    }

    /// Remove an entire repo, or a single revision within it when
    /// `revision` is given, mirroring `model_controller.repo_rm`.
    pub fn remove_repo(&self, repo_id: &str, revision: Option<&str>) -> std::io::Result<()> {
        let Some(info) = self.repo_info(repo_id) else {
            return Ok(());
        };
        for rev in &info.revisions {
            if let Some(revision) = revision {
                let matches = rev.refs.iter().any(|r| r == revision) || rev.commit_hash.starts_with(revision);
                if !matches {
                    continue;
                }
            }
            for file in &rev.files {
                self.remove_file(repo_id, &rev.commit_hash, file)?;
            }
        }
        Ok(())
    }
}

fn can_delete_blob(file_name: &str, snapshots_dir: &Path, blob_path: &Path) -> bool {
    let Ok(entries) = fs::read_dir(snapshots_dir) else {
        return true;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let candidate = entry.path().join(file_name);
        if let Ok(target) = fs::read_link(&candidate) {
            let resolved = if target.is_absolute() {
                target
            } else {
                candidate.parent().map(|p| p.join(&target)).unwrap_or(target)
            };
            if resolved == blob_path {
                return false;
            }
        }
    }
    true
}

/// Remove `path`, then remove now-empty parent directories up to (but
/// excluding) `root`, mirroring `model_controller._rm_file`.
fn remove_file_and_prune(path: &Path, root: &Path) -> std::io::Result<()> {
    if path.is_file() {
        fs::remove_file(path)?;
    }
    let mut parent = path.parent().map(|p| p.to_path_buf());
    while let Some(dir) = &parent {
        if !dir.starts_with(root) || dir == root {
            break;
        }
        match fs::read_dir(dir) {
            Ok(mut entries) if entries.next().is_none() => {
                fs::remove_dir(dir)?;
                parent = dir.parent().map(|p| p.to_path_buf());
            }
            _ => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn write_repo(root: &Path, repo_id: &str, commit: &str, refname: &str, files: &[(&str, &[u8])]) {
        let repo_dir = root.join("models").join(FsCacheView::repo_dir_name(repo_id));
        let blobs_dir = repo_dir.join("blobs");
        let snapshot_dir = repo_dir.join("snapshots").join(commit);
        fs::create_dir_all(&blobs_dir).unwrap();
        fs::create_dir_all(&snapshot_dir).unwrap();
        fs::create_dir_all(repo_dir.join("refs")).unwrap();
        fs::write(repo_dir.join("refs").join(refname), commit).unwrap();

        for (name, content) in files {
            let blob_id = format!("blob-{name}");
            fs::write(blobs_dir.join(&blob_id), content).unwrap();
            let link_path = snapshot_dir.join(name);
            if let Some(parent) = link_path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            symlink(blobs_dir.join(&blob_id), &link_path).unwrap();
        }
    }

    #[test]
    fn reads_repo_and_file_info_through_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(
            dir.path(),
            "org/model",
            "deadbeef0000",
            "main",
            &[("config.json", b"{}"), ("weights/model.bin", b"binarydata")],
        );

        let view = FsCacheView::new(dir.path());
        let repo = view.repo_info("org/model").unwrap();
        assert_eq!(repo.revisions.len(), 1);
        assert_eq!(repo.revisions[0].refs, vec!["main".to_string()]);

        let info = view.file_info("org/model", "main", "config.json").unwrap();
        assert_eq!(info.size, 2);
        assert_eq!(info.blob_id, "blob-config.json");

        let info = view
            .file_info("org/model", "deadbeef", "weights/model.bin")
            .unwrap();
        assert_eq!(info.size, 10);
    }

    #[test]
    fn unknown_repo_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let view = FsCacheView::new(dir.path());
        assert!(view.repo_info("org/nope").is_none());
        assert!(view.file_info("org/nope", "main", "f").is_none());
    }

    #[test]
    fn repo_list_enumerates_all_cached_repos() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path(), "org/a", "aaa111", "main", &[("f.txt", b"x")]);
        write_repo(dir.path(), "org/b", "bbb222", "main", &[("f.txt", b"x")]);

        let view = FsCacheView::new(dir.path());
        let mut ids: Vec<String> = view.repo_list().into_iter().map(|r| r.repo_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["org/a".to_string(), "org/b".to_string()]);
    }

    #[test]
    fn remove_file_deletes_symlink_and_unreferenced_blob() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path(), "org/model", "deadbeef0000", "main", &[("config.json", b"{}")]);

        let view = FsCacheView::new(dir.path());
        view.remove_file("org/model", "main", "config.json").unwrap();

        assert!(view.file_info("org/model", "main", "config.json").is_none());
        let blob_path = dir
            .path()
            .join("models")
            .join(FsCacheView::repo_dir_name("org/model"))
            .join("blobs")
            .join("blob-config.json");
        assert!(!blob_path.exists());
    }

    #[test]
    fn remove_repo_clears_every_revision() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path(), "org/model", "deadbeef0000", "main", &[("a.txt", b"x"), ("b.txt", b"y")]);

        let view = FsCacheView::new(dir.path());
        view.remove_repo("org/model", None).unwrap();

        assert!(view.file_info("org/model", "main", "a.txt").is_none());
        assert!(view.file_info("org/model", "main", "b.txt").is_none());
    }
}
