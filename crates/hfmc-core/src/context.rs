//! The daemon's request-scoped state, passed into axum via `State`.
//! Explicit and constructed once at startup, then threaded through the
//! call graph as a cheaply-`Clone`-able `Arc` bundle rather than a
//! process-wide singleton.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::etag::EtagStore;
use crate::cache::repo_files::RepoFileListStore;
use crate::cache::CacheView;
use crate::config::ConfigReader;
use crate::http_client::HttpClient;
use crate::prober::PeerProber;

/// Everything a daemon request handler needs. Cheap to clone: every
/// field is already behind an `Arc`.
#[derive(Clone)]
pub struct DaemonContext {
    pub cache: Arc<dyn CacheView>,
    pub etags: Arc<EtagStore>,
    pub repo_files: Arc<RepoFileListStore>,
    pub prober: Arc<PeerProber>,
    pub http: Arc<HttpClient>,
    pub config: Arc<dyn ConfigReader>,
    pub shutdown: CancellationToken,
}

impl DaemonContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<dyn CacheView>,
        etags: Arc<EtagStore>,
        repo_files: Arc<RepoFileListStore>,
        prober: Arc<PeerProber>,
        http: Arc<HttpClient>,
        config: Arc<dyn ConfigReader>,
    ) -> Self {
        Self {
            cache,
            etags,
            repo_files,
            prober,
            http,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Reload the peer registry from configuration and kick the
    /// prober's scheduler. The full registry, not the prober's own
    /// alive subset, is the source of truth: a peer that's merely down
    /// right now still belongs in the registry for re-probing, and a
    /// peer added but never yet probed must still make it in.
    pub async fn reload_peers(&self) {
        self.prober.update_peers(self.config.get_peers()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fs::FsCacheView;
    use crate::peer::Peer;
    use std::path::PathBuf;

    struct StubConfig {
        peers: Vec<Peer>,
    }

    impl ConfigReader for StubConfig {
        fn get_peers(&self) -> Vec<Peer> {
            self.peers.clone()
        }
        fn get_cache_root(&self) -> PathBuf {
            PathBuf::new()
        }
        fn get_daemon_port(&self) -> u16 {
            0
        }
    }

    fn always_alive_probe() -> crate::prober::ProbeFn {
        Arc::new(|mut p: Peer| {
            Box::pin(async move {
                p.alive = true;
                p.epoch += 1;
                p
            })
        })
    }

    /// Regression test for reload_peers previously seeding the staged
    /// update from `prober.alives()` (the currently-alive subset)
    /// instead of the configured registry: before anything has been
    /// probed, alives() is empty, so that seed would stage an empty
    /// registry and every configured peer would be dropped forever.
    #[tokio::test(start_paused = true)]
    async fn reload_peers_uses_full_config_registry() {
        let dir = tempfile::tempdir().unwrap();
        let configured = vec![Peer::new("127.0.0.2", 9090), Peer::new("127.0.0.3", 9090)];

        let cache = Arc::new(FsCacheView::new(dir.path()));
        let etags = Arc::new(EtagStore::new(dir.path()));
        let repo_files = Arc::new(RepoFileListStore::new(dir.path()));
        let http = Arc::new(HttpClient::new());
        let prober = Arc::new(PeerProber::new(vec![], always_alive_probe()));
        let config = Arc::new(StubConfig { peers: configured.clone() });
        let ctx = DaemonContext::new(cache, etags, repo_files, prober, http, config);

        assert!(ctx.prober.alives().await.is_empty());
        ctx.prober.start();

        ctx.reload_peers().await;

        for _ in 0..configured.len() {
            tokio::time::advance(crate::api_settings::PROBE_INTERVAL).await;
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;

        assert_eq!(ctx.prober.alives().await.len(), configured.len());
        ctx.prober.stop().await;
    }
}
