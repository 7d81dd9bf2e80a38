//! Fetch Orchestrator: the client-side pipeline that prefers peers over
//! public mirrors when pulling model files.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::api_settings::PUBLIC_MIRRORS;
use crate::cache::{etag::EtagStore, repo_files::RepoFileListStore, CacheView};
use crate::error::{Error, Result as CoreResult};
use crate::http_client::HttpClient;
use crate::peer::Peer;

/// A single download attempt against one endpoint (a peer's base url or
/// a public mirror). Injected so `hfmc-core` doesn't hard-depend on a
/// concrete HTTP download implementation. `Err(Error::Unauthorized)`
/// is distinguished from every other failure kind: it's the one case
/// `file_add` doesn't just move on to the next candidate for.
pub trait Downloader: Send + Sync {
    fn download_file<'a>(
        &'a self,
        endpoint: &'a str,
        repo_id: &'a str,
        revision: &'a str,
        file: &'a str,
    ) -> Pin<Box<dyn Future<Output = CoreResult<()>> + Send + 'a>>;
}

/// Resolves a revision against remote endpoints when the local cache
/// doesn't already know it, and enumerates a repo's files remotely.
/// Grounded on `hf_wrapper.verify_revision`/`get_repo_file_list`.
pub trait RemoteRepoLookup: Send + Sync {
    fn verify_revision<'a>(
        &'a self,
        repo_id: &'a str,
        revision: &'a str,
        endpoints: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;

    fn file_list<'a>(
        &'a self,
        endpoint: &'a str,
        repo_id: &'a str,
        revision: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<Vec<String>>> + Send + 'a>>;
}

pub struct FetchOrchestrator {
    cache: Arc<dyn CacheView>,
    etags: Arc<EtagStore>,
    repo_files: Arc<RepoFileListStore>,
    http: Arc<HttpClient>,
    downloader: Arc<dyn Downloader>,
    remote: Arc<dyn RemoteRepoLookup>,
    get_peers: Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Vec<Peer>> + Send>> + Send + Sync>,
}

impl FetchOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<dyn CacheView>,
        etags: Arc<EtagStore>,
        repo_files: Arc<RepoFileListStore>,
        http: Arc<HttpClient>,
        downloader: Arc<dyn Downloader>,
        remote: Arc<dyn RemoteRepoLookup>,
        get_peers: Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Vec<Peer>> + Send>> + Send + Sync>,
    ) -> Self {
        Self {
            cache,
            etags,
            repo_files,
            http,
            downloader,
            remote,
            get_peers,
        }
    }

    fn mirror_endpoints() -> Vec<String> {
        PUBLIC_MIRRORS.iter().map(|s| s.to_string()).collect()
    }

    /// Peers whose alive set responds successfully to a HEAD for this
    /// exact file, followed by the public mirrors, in that order.
    async fn candidate_endpoints(&self, repo_id: &str, revision: &str, file: &str) -> Vec<String> {
        let peers = (self.get_peers)().await;
        let checks = peers.iter().map(|p| {
            let http = Arc::clone(&self.http);
            let p = p.clone();
            async move {
                let has_file = http.head_file(&p, repo_id, revision, file).await;
                (p, has_file)
            }
        });
        let mut endpoints: Vec<String> = join_all(checks)
            .await
            .into_iter()
            .filter(|(_, has_file)| *has_file)
            .map(|(p, _)| p.base_url())
            .collect();
        endpoints.extend(Self::mirror_endpoints());
        endpoints
    }

    /// Download a single file into the cache, preferring peers. Returns
    /// `true` immediately if the file is already cached.
    ///
    /// A gated-repo (`Unauthorized`) failure aborts the whole call
    /// instead of falling through to the next candidate: no other peer
    /// or mirror is going to hold credentials the caller doesn't have.
    /// Every other failure kind just moves on to the next endpoint.
    pub async fn file_add(&self, repo_id: &str, file: &str, revision: &str) -> bool {
        if self.cache.file_info(repo_id, revision, file).is_some() {
            return true;
        }

        let endpoints = self.candidate_endpoints(repo_id, revision, file).await;

        for endpoint in endpoints {
            info!(file, endpoint = %endpoint, "attempting file fetch");
            match self.downloader.download_file(&endpoint, repo_id, revision, file).await {
                Ok(()) => {
                    if let Some(info) = self.cache.file_info(repo_id, revision, file) {
                        if let Some(etag) = self.http.fetch_etag(&endpoint, repo_id, revision, file).await {
                            if let Err(e) = self.etags.save(&info.path, &etag).await {
                                warn!(error = %e, "failed to persist etag after successful download");
                            }
                        } else {
                            // No ETag reported: treat as a failed attempt and
                            // abort this candidate.
                            continue;
                        }
                    }
                    return true;
                }
                Err(Error::Unauthorized(hint)) => {
                    warn!(file, endpoint = %endpoint, hint, "gated repo, aborting file_add");
                    return false;
                }
                Err(e) => {
                    debug!(file, endpoint = %endpoint, error = %e, "download attempt failed, trying next endpoint");
                }
            }
        }

        false
    }

    /// First-responder race over the alive peer set: any peer that has
    /// the file list wins.
    async fn file_list_from_peers(&self, repo_id: &str, revision: &str) -> Option<Vec<String>> {
        let peers = (self.get_peers)().await;
        if peers.is_empty() {
            return None;
        }
        let results = join_all(peers.iter().map(|p| {
            let http = Arc::clone(&self.http);
            let p = p.clone();
            let repo_id = repo_id.to_string();
            let revision = revision.to_string();
            async move {
                let (user, model) = split_repo_id(&repo_id);
                http.get_repo_file_list(&p, user, model, &revision).await
            }
        }))
        .await;
        results.into_iter().flatten().next()
    }

    async fn file_list_from_mirrors(&self, repo_id: &str, revision: &str) -> Option<Vec<String>> {
        for endpoint in Self::mirror_endpoints() {
            if let Some(files) = self.remote.file_list(&endpoint, repo_id, revision).await {
                return Some(files);
            }
        }
        None
    }

    async fn resolve_file_list(&self, repo_id: &str, revision: &str) -> Option<Vec<String>> {
        if let Some(files) = self.repo_files.load(repo_id, revision).await {
            return Some(files);
        }
        if let Some(files) = self.file_list_from_peers(repo_id, revision).await {
            return Some(files);
        }
        self.file_list_from_mirrors(repo_id, revision).await
    }

    /// Fetch every file of a repo's revision. Persists the file list
    /// only after every file has landed in the cache: a partial repo
    /// never reports a file list.
    pub async fn repo_add(&self, repo_id: &str, revision: &str) -> bool {
        let normalized = match self.cache.revision_info(repo_id, revision) {
            Some(rev) => rev.commit_hash,
            None => {
                let endpoints = Self::mirror_endpoints();
                let Some(sha) = self.remote.verify_revision(repo_id, revision, &endpoints).await else {
                    warn!(revision, "failed to verify revision");
                    return false;
                };
                sha
            }
        };

        let Some(files) = self.resolve_file_list(repo_id, &normalized).await else {
            warn!(repo_id, "failed to resolve repo file list");
            return false;
        };

        for file in &files {
            if !self.file_add(repo_id, file, &normalized).await {
                warn!(file, "aborting repo_add: file fetch failed");
                return false;
            }
        }

        if let Err(e) = self.repo_files.save(repo_id, &normalized, &files).await {
            warn!(error = %e, "failed to persist repo file list after full fetch");
            return false;
        }

        true
    }
}

fn split_repo_id(repo_id: &str) -> (&str, &str) {
    repo_id.split_once('/').unwrap_or((repo_id, ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CachedFileInfo, RepoInfo, RevisionInfo};
    use std::sync::Mutex;

    struct StubCache {
        cached: Mutex<Vec<(String, String, String)>>,
    }

    impl CacheView for StubCache {
        fn file_info(&self, repo_id: &str, revision: &str, file: &str) -> Option<CachedFileInfo> {
            let key = (repo_id.to_string(), revision.to_string(), file.to_string());
            if self.cached.lock().unwrap().contains(&key) {
                Some(CachedFileInfo {
                    path: std::path::PathBuf::from(file),
                    size: 1,
                    blob_id: "blob".into(),
                })
            } else {
                None
            }
        }
        fn revision_info(&self, _: &str, _: &str) -> Option<RevisionInfo> {
            None
        }
        fn repo_info(&self, _: &str) -> Option<RepoInfo> {
            None
        }
        fn repo_list(&self) -> Vec<RepoInfo> {
            vec![]
        }
    }

    struct StubDownloader {
        succeeds_for: Vec<String>,
    }

    impl Downloader for StubDownloader {
        fn download_file<'a>(
            &'a self,
            endpoint: &'a str,
            _repo_id: &'a str,
            _revision: &'a str,
            _file: &'a str,
        ) -> Pin<Box<dyn Future<Output = CoreResult<()>> + Send + 'a>> {
            let ok = self.succeeds_for.iter().any(|e| e == endpoint);
            Box::pin(async move {
                if ok {
                    Ok(())
                } else {
                    Err(Error::transport(endpoint, anyhow::anyhow!("stub failure")))
                }
            })
        }
    }

    /// Reports every attempt as a gated-repo failure and counts calls,
    /// so tests can assert `file_add` stops after the first candidate
    /// instead of trying the rest.
    struct GatedDownloader {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl Downloader for GatedDownloader {
        fn download_file<'a>(
            &'a self,
            endpoint: &'a str,
            _repo_id: &'a str,
            _revision: &'a str,
            _file: &'a str,
        ) -> Pin<Box<dyn Future<Output = CoreResult<()>> + Send + 'a>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Box::pin(async move { Err(Error::unauthorized(format!("{endpoint} requires login"))) })
        }
    }

    struct StubRemote;
    impl RemoteRepoLookup for StubRemote {
        fn verify_revision<'a>(
            &'a self,
            _repo_id: &'a str,
            revision: &'a str,
            _endpoints: &'a [String],
        ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
            let revision = revision.to_string();
            Box::pin(async move { Some(revision) })
        }
        fn file_list<'a>(
            &'a self,
            _endpoint: &'a str,
            _repo_id: &'a str,
            _revision: &'a str,
        ) -> Pin<Box<dyn Future<Output = Option<Vec<String>>> + Send + 'a>> {
            Box::pin(async move { None })
        }
    }

    #[tokio::test]
    async fn file_add_short_circuits_when_already_cached() {
        let cache = Arc::new(StubCache {
            cached: Mutex::new(vec![("org/m".into(), "main".into(), "f.json".into())]),
        });
        let dir = tempfile::tempdir().unwrap();
        let etags = Arc::new(EtagStore::new(dir.path()));
        let repo_files = Arc::new(RepoFileListStore::new(dir.path()));
        let orchestrator = FetchOrchestrator::new(
            cache,
            etags,
            repo_files,
            Arc::new(HttpClient::new()),
            Arc::new(StubDownloader { succeeds_for: vec![] }),
            Arc::new(StubRemote),
            Arc::new(|| Box::pin(async { Vec::new() })),
        );

        assert!(orchestrator.file_add("org/m", "f.json", "main").await);
    }

    #[tokio::test]
    async fn file_add_fails_when_no_endpoint_succeeds() {
        let cache = Arc::new(StubCache {
            cached: Mutex::new(vec![]),
        });
        let dir = tempfile::tempdir().unwrap();
        let etags = Arc::new(EtagStore::new(dir.path()));
        let repo_files = Arc::new(RepoFileListStore::new(dir.path()));
        let orchestrator = FetchOrchestrator::new(
            cache,
            etags,
            repo_files,
            Arc::new(HttpClient::new()),
            Arc::new(StubDownloader { succeeds_for: vec![] }),
            Arc::new(StubRemote),
            Arc::new(|| Box::pin(async { Vec::new() })),
        );

        assert!(!orchestrator.file_add("org/m", "f.json", "main").await);
    }

    #[tokio::test]
    async fn file_add_aborts_immediately_on_gated_repo() {
        let cache = Arc::new(StubCache {
            cached: Mutex::new(vec![]),
        });
        let dir = tempfile::tempdir().unwrap();
        let etags = Arc::new(EtagStore::new(dir.path()));
        let repo_files = Arc::new(RepoFileListStore::new(dir.path()));
        let downloader = Arc::new(GatedDownloader {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let orchestrator = FetchOrchestrator::new(
            cache,
            etags,
            repo_files,
            Arc::new(HttpClient::new()),
            Arc::clone(&downloader) as Arc<dyn Downloader>,
            Arc::new(StubRemote),
            Arc::new(|| Box::pin(async { Vec::new() })),
        );

        assert!(!orchestrator.file_add("org/m", "f.json", "main").await);
        // Two public mirrors are always appended as candidates; a
        // gated-repo failure on the first one must abort the whole
        // call instead of trying the second.
        assert_eq!(downloader.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
