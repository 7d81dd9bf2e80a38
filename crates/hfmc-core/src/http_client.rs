//! Bounded, exception-quiet HTTP primitives used by the Fetch
//! Orchestrator, the Prober, and client commands: any transport failure
//! yields a falsy result, never an error the caller has to handle.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::api_settings::{
    resolve_path, API_DAEMON_PEERS_ALIVE, API_DAEMON_PEERS_CHANGE, API_DAEMON_STATUS,
    API_DAEMON_STOP, API_PEERS_PROBE, TIMEOUT_DAEMON, TIMEOUT_EXISTENCE, TIMEOUT_PROBE,
};
use crate::peer::Peer;

/// Low-level client, one per caller. Cheap to construct (`reqwest::Client`
/// internally pools connections), matching `HttpApiClient::new` in the
/// teacher.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn quiet_get(&self, url: &str, timeout: Duration) -> Option<reqwest::Response> {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(resp) => Some(resp),
            Err(e) => {
                debug!(url, error = %e, "transport error on GET");
                None
            }
        }
    }

    async fn quiet_head(&self, url: &str, timeout: Duration) -> Option<reqwest::Response> {
        match self.client.head(url).timeout(timeout).send().await {
            Ok(resp) => Some(resp),
            Err(e) => {
                debug!(url, error = %e, "transport error on HEAD");
                None
            }
        }
    }

    /// Ping a peer to check if it is alive. Never fails: a transport
    /// error is indistinguishable from a dead peer.
    pub async fn probe_peer(&self, mut peer: Peer) -> Peer {
        let url = format!("{}{}", peer.base_url(), API_PEERS_PROBE);
        let resp = self.quiet_get(&url, TIMEOUT_PROBE).await;
        peer.alive = resp.map(|r| r.status().is_success()).unwrap_or(false);
        peer.epoch = now_epoch_secs();
        peer
    }

    /// Check if a peer has a given file, via HEAD on the resolve path.
    pub async fn head_file(
        &self,
        peer: &Peer,
        repo_id: &str,
        revision: &str,
        file: &str,
    ) -> bool {
        let url = format!(
            "{}/{}",
            peer.base_url(),
            resolve_path(repo_id, revision, file)
        );
        self.quiet_head(&url, TIMEOUT_EXISTENCE)
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// HEAD the resolve endpoint at an arbitrary endpoint (peer or
    /// mirror base url) and extract the reported ETag, stripped of
    /// surrounding quotes.
    pub async fn fetch_etag(
        &self,
        endpoint: &str,
        repo_id: &str,
        revision: &str,
        file: &str,
    ) -> Option<String> {
        let url = format!("{endpoint}/{}", resolve_path(repo_id, revision, file));
        let resp = self.quiet_head(&url, TIMEOUT_EXISTENCE).await?;
        if !resp.status().is_success() {
            return None;
        }
        let headers = resp.headers();
        let raw = headers
            .get("ETag")
            .or_else(|| headers.get("X-Linked-ETag"))?
            .to_str()
            .ok()?;
        Some(raw.trim_matches('"').to_string())
    }

    /// Query a daemon's alive-peers endpoint.
    pub async fn get_alive_peers(&self, daemon: &Peer) -> Vec<Peer> {
        let url = format!("{}{}", daemon.base_url(), API_DAEMON_PEERS_ALIVE);
        let Some(resp) = self.quiet_get(&url, TIMEOUT_DAEMON).await else {
            return Vec::new();
        };
        if !resp.status().is_success() {
            return Vec::new();
        }
        #[derive(Deserialize)]
        struct Wire {
            ip: String,
            port: u16,
            alive: bool,
            epoch: u64,
        }
        match resp.json::<Vec<Wire>>().await {
            Ok(peers) => peers
                .into_iter()
                .map(|w| Peer {
                    ip: w.ip,
                    port: w.port,
                    alive: w.alive,
                    epoch: w.epoch,
                })
                .collect(),
            Err(e) => {
                debug!(error = %e, "malformed peers_alive response");
                Vec::new()
            }
        }
    }

    /// Fetch the repo file list for an exact commit hash from a peer.
    pub async fn get_repo_file_list(
        &self,
        peer: &Peer,
        user: &str,
        model: &str,
        revision: &str,
    ) -> Option<Vec<String>> {
        let url = format!(
            "{}{}",
            peer.base_url(),
            crate::api_settings::repo_file_list_path(user, model, revision)
        );
        let resp = self.quiet_get(&url, TIMEOUT_EXISTENCE).await?;
        if !resp.status().is_success() {
            return None;
        }
        resp.json::<Vec<String>>().await.ok()
    }

    pub async fn is_daemon_running(&self, daemon: &Peer) -> bool {
        let url = format!("{}{}", daemon.base_url(), API_DAEMON_STATUS);
        self.quiet_get(&url, TIMEOUT_DAEMON)
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    pub async fn stop_daemon(&self, daemon: &Peer) -> bool {
        let url = format!("{}{}", daemon.base_url(), API_DAEMON_STOP);
        self.quiet_get(&url, TIMEOUT_DAEMON)
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    pub async fn notify_peers_change(&self, daemon: &Peer) -> bool {
        let url = format!("{}{}", daemon.base_url(), API_DAEMON_PEERS_CHANGE);
        self.quiet_get(&url, TIMEOUT_DAEMON)
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

fn now_epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
