//! The [`Peer`] identity used throughout the daemon: another installation
//! of hfmc reachable over HTTP at `(ip, port)`.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Another hfmc installation reachable over HTTP.
///
/// Identity is `(ip, port)` only: `alive` and `epoch` are liveness-probe
/// bookkeeping and must not affect equality, hashing, or set membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub alive: bool,
    #[serde(default)]
    pub epoch: u64,
}

impl Peer {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            alive: false,
            epoch: 0,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.port.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn identity_ignores_alive_and_epoch() {
        let mut a = Peer::new("127.0.0.1", 9090);
        let mut b = Peer::new("127.0.0.1", 9090);
        a.alive = true;
        a.epoch = 42;
        b.alive = false;
        b.epoch = 0;
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn identity_differs_by_ip_or_port() {
        assert_ne!(Peer::new("127.0.0.1", 9090), Peer::new("127.0.0.2", 9090));
        assert_ne!(Peer::new("127.0.0.1", 9090), Peer::new("127.0.0.1", 9091));
    }
}
