//! TOML-backed configuration, resolved via an OS-appropriate directory.

use std::path::{Path, PathBuf};

use hfmc_core::config::ConfigReader;
use hfmc_core::peer::Peer;
use serde::{Deserialize, Serialize};

const DEFAULT_DAEMON_PORT: u16 = 9090;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigPeer {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HfmcConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default)]
    pub peers: Vec<ConfigPeer>,
    #[serde(default = "default_daemon_port")]
    pub daemon_port: u16,
}

fn default_cache_dir() -> String {
    directories::ProjectDirs::from("com", "hfmc", "hfmc")
        .map(|d| d.cache_dir().join("models").to_string_lossy().into_owned())
        .unwrap_or_else(|| "./hfmc-cache".to_string())
}

fn default_daemon_port() -> u16 {
    DEFAULT_DAEMON_PORT
}

impl Default for HfmcConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            peers: Vec::new(),
            daemon_port: DEFAULT_DAEMON_PORT,
        }
    }
}

impl ConfigReader for HfmcConfig {
    fn get_peers(&self) -> Vec<Peer> {
        self.peers.iter().map(|p| Peer::new(p.ip.clone(), p.port)).collect()
    }

    fn get_cache_root(&self) -> PathBuf {
        PathBuf::from(&self.cache_dir)
    }

    fn get_daemon_port(&self) -> u16 {
        self.daemon_port
    }
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "hfmc", "hfmc")
        .ok_or_else(|| anyhow::anyhow!("could not determine a config directory for this platform"))?;
    Ok(dirs.config_dir().join("config.toml"))
}

pub fn load_config() -> anyhow::Result<HfmcConfig> {
    let path = config_path()?;
    if !path.exists() {
        let config = HfmcConfig::default();
        save_config(&config)?;
        return Ok(config);
    }
    let text = std::fs::read_to_string(&path)?;
    Ok(toml::from_str(&text)?)
}

pub fn save_config(config: &HfmcConfig) -> anyhow::Result<()> {
    let path = config_path()?;
    write_config_at(&path, config)
}

fn write_config_at(path: &Path, config: &HfmcConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(config)?)?;
    Ok(())
}

pub fn config_toml_text() -> anyhow::Result<String> {
    let path = config_path()?;
    if !path.exists() {
        save_config(&HfmcConfig::default())?;
    }
    Ok(std::fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_toml() {
        let config = HfmcConfig {
            cache_dir: "/tmp/hfmc".to_string(),
            peers: vec![ConfigPeer {
                ip: "127.0.0.1".to_string(),
                port: 9090,
            }],
            daemon_port: 9191,
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: HfmcConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.daemon_port, 9191);
        assert_eq!(parsed.peers.len(), 1);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let parsed: HfmcConfig = toml::from_str("").unwrap();
        assert_eq!(parsed.daemon_port, DEFAULT_DAEMON_PORT);
        assert!(parsed.peers.is_empty());
    }
}
