//! Wire-protocol path templates and per-call timeouts.

use std::time::Duration;

pub const API_PEERS_PROBE: &str = "/hfmc_api/peers/ping";
pub const API_DAEMON_STATUS: &str = "/hfmc_api/daemon/status";
pub const API_DAEMON_STOP: &str = "/hfmc_api/daemon/stop";
pub const API_DAEMON_PEERS_ALIVE: &str = "/hfmc_api/daemon/peers_alive";
pub const API_DAEMON_PEERS_CHANGE: &str = "/hfmc_api/daemon/peers_change";

/// `{repo_id}/resolve/{revision}/{file}` relative to a peer or mirror base url.
pub fn resolve_path(repo_id: &str, revision: &str, file: &str) -> String {
    format!("{repo_id}/resolve/{revision}/{file}")
}

/// `/hfmc_api/fetch/repo_file_list/{user}/{model}/{revision}`
pub fn repo_file_list_path(user: &str, model: &str, revision: &str) -> String {
    format!("/hfmc_api/fetch/repo_file_list/{user}/{model}/{revision}")
}

/// Probe HEAD (peer liveness ping).
pub const TIMEOUT_PROBE: Duration = Duration::from_secs(10);
/// Daemon control calls (status, stop, peers_alive, peers_change).
pub const TIMEOUT_DAEMON: Duration = Duration::from_secs(2);
/// Peer existence HEAD.
pub const TIMEOUT_EXISTENCE: Duration = Duration::from_secs(10);
/// Whole-file fetch, streaming.
pub const TIMEOUT_FETCH: Duration = Duration::from_secs(30);

/// Public mirror fallback endpoints, tried in order after alive peers.
pub const PUBLIC_MIRRORS: &[&str] = &["https://hf-mirror.com", "https://huggingface.co"];

/// Scheduler wakeup cadence for the peer prober.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(3);

/// Streaming buffer size for range GETs (256 KiB).
pub const STREAM_BUF_SIZE: usize = 256 * 1024;
