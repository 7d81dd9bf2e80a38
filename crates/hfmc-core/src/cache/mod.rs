//! Cache View: a read-only adapter over an external content-addressed
//! cache layout. `hfmc-core` depends only on the [`CacheView`] trait;
//! [`fs::FsCacheView`] is the default adapter over a filesystem layout.

pub mod etag;
pub mod fs;
pub mod repo_files;

use std::path::PathBuf;

/// `(repo, revision, file) -> {path, size, blob_id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFileInfo {
    pub path: PathBuf,
    pub size: u64,
    pub blob_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionInfo {
    pub commit_hash: String,
    pub refs: Vec<String>,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    pub repo_id: String,
    pub revisions: Vec<RevisionInfo>,
}

/// Pure query surface over the on-disk cache. No mutation: file
/// placement is the external downloader's job.
pub trait CacheView: Send + Sync {
    fn file_info(&self, repo_id: &str, revision: &str, file: &str) -> Option<CachedFileInfo>;
    fn revision_info(&self, repo_id: &str, revision: &str) -> Option<RevisionInfo>;
    fn repo_info(&self, repo_id: &str) -> Option<RepoInfo>;
    fn repo_list(&self) -> Vec<RepoInfo>;
}

/// Matching policy for `revision` against a repo's known revisions: an
/// exact ref-name hit wins over a commit-hash prefix match. A match is
/// not guaranteed unique; callers must not rely on order among multiple
/// prefix matches.
pub fn resolve_revision<'a>(
    revisions: &'a [RevisionInfo],
    revision: &str,
) -> Option<&'a RevisionInfo> {
    revisions
        .iter()
        .find(|r| r.refs.iter().any(|r| r == revision))
        .or_else(|| revisions.iter().find(|r| r.commit_hash.starts_with(revision)))
}
