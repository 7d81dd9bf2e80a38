//! The narrow, read-only configuration surface `hfmc-core` depends on.
//! The concrete, TOML-backed implementation lives in the `hfmc` binary
//! crate so that `hfmc-core` never touches the filesystem for
//! configuration directly.

use std::path::PathBuf;

use crate::peer::Peer;

pub trait ConfigReader: Send + Sync {
    fn get_peers(&self) -> Vec<Peer>;
    fn get_cache_root(&self) -> PathBuf;
    fn get_daemon_port(&self) -> u16;
}
