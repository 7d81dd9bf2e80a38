mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hfmc_core::cache::fs::FsCacheView;
use hfmc_core::cache::{etag::EtagStore, repo_files::RepoFileListStore, CacheView};
use hfmc_core::config::ConfigReader;
use hfmc_core::context::DaemonContext;
use hfmc_core::downloader::HfDownloader;
use hfmc_core::http_client::HttpClient;
use hfmc_core::peer::Peer;
use hfmc_core::prober::PeerProber;
use hfmc_core::remote::HfRemoteLookup;
use tracing::{error, info};

use crate::config::{load_config, save_config, ConfigPeer};

#[derive(Parser)]
#[command(name = "hfmc", version, author, about = "Peer-to-peer accelerator for fetching ML model artifacts.")]
struct Opts {
    /// RUST_LOG-style filter. Defaults to "info" when unset.
    #[arg(long = "log-level", env = "HFMC_LOG_LEVEL")]
    log_level: Option<String>,

    /// Write logs to this file in addition to stdout.
    #[arg(long = "log-file", env = "HFMC_LOG_FILE")]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run or control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
    /// Manage the peer registry.
    Peer {
        #[command(subcommand)]
        command: PeerCommand,
    },
    /// Add, list, or remove cached models.
    Model {
        #[command(subcommand)]
        command: ModelCommand,
    },
    /// Inspect or edit the persisted configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum DaemonCommand {
    /// Start the daemon. Spawns a detached background process when `--detach` is set.
    Start {
        #[arg(long)]
        detach: bool,
    },
    /// Request a graceful stop via the control API.
    Stop,
    /// Check whether the daemon is reachable.
    Status,
}

#[derive(Subcommand)]
enum PeerCommand {
    /// Add a peer to the registry.
    Add { ip: String, port: u16 },
    /// Remove a peer from the registry.
    Rm { ip: String, port: u16 },
    /// List configured peers and their last-known liveness.
    Ls,
}

#[derive(Subcommand)]
enum ModelCommand {
    /// List cached repos, or files within one with `--repo`.
    Ls {
        #[arg(long)]
        repo: Option<String>,
    },
    /// Download and cache a model file or an entire repo revision.
    Add {
        repo: String,
        #[arg(short = 'f', long)]
        file: Option<String>,
        #[arg(short = 'v', long, default_value = "main")]
        revision: String,
    },
    /// Remove a cached file or an entire repo revision.
    Rm {
        repo: String,
        #[arg(short = 'f', long)]
        file: Option<String>,
        #[arg(short = 'v', long)]
        revision: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the persisted configuration file.
    Show,
}

fn init_logging(opts: &Opts) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = opts
        .log_level
        .clone()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let registry = tracing_subscriber::fmt().with_env_filter(filter);

    if let Some(path) = &opts.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file {path}"))?;
        registry.with_writer(file).init();
    } else {
        registry.init();
    }
    Ok(())
}

async fn daemon_context(config: &config::HfmcConfig) -> anyhow::Result<DaemonContext> {
    let cache_root = config.get_cache_root();
    let cache = Arc::new(FsCacheView::new(&cache_root));
    let etags = Arc::new(EtagStore::new(&cache_root));
    let repo_files = Arc::new(RepoFileListStore::new(&cache_root));
    let http = Arc::new(HttpClient::new());
    let prober = Arc::new(PeerProber::new(
        config.get_peers(),
        hfmc_core::http_api::probe_fn_from_client(Arc::clone(&http)),
    ));
    prober.start();
    let config_reader: Arc<dyn ConfigReader> = Arc::new(config.clone());
    Ok(DaemonContext::new(cache, etags, repo_files, prober, http, config_reader))
}

async fn run_daemon_start(detach: bool) -> anyhow::Result<()> {
    if detach {
        let exe = std::env::current_exe()?;
        std::process::Command::new(exe)
            .arg("daemon")
            .arg("start")
            .spawn()
            .context("failed to spawn detached daemon process")?;
        info!("daemon spawned in the background");
        return Ok(());
    }

    let config = load_config()?;
    let ctx = daemon_context(&config).await?;
    let addr: SocketAddr = ([0, 0, 0, 0], config.get_daemon_port()).into();
    hfmc_core::http_api::serve(ctx, addr).await
}

async fn run_daemon_stop() -> anyhow::Result<()> {
    let config = load_config()?;
    let http = HttpClient::new();
    let daemon = Peer::new("127.0.0.1", config.daemon_port);
    if http.stop_daemon(&daemon).await {
        info!("daemon stopped");
    } else {
        error!("daemon failed to stop (is it running?)");
    }
    Ok(())
}

async fn run_daemon_status() -> anyhow::Result<()> {
    let config = load_config()?;
    let http = HttpClient::new();
    let daemon = Peer::new("127.0.0.1", config.daemon_port);
    if http.is_daemon_running(&daemon).await {
        info!("daemon is running");
    } else {
        info!("daemon is NOT running");
    }
    Ok(())
}

async fn run_peer(command: PeerCommand) -> anyhow::Result<()> {
    let mut config = load_config()?;
    match command {
        PeerCommand::Add { ip, port } => {
            if !config.peers.iter().any(|p| p.ip == ip && p.port == port) {
                config.peers.push(ConfigPeer { ip: ip.clone(), port });
                save_config(&config)?;
            }
            let http = HttpClient::new();
            let daemon = Peer::new("127.0.0.1", config.daemon_port);
            http.notify_peers_change(&daemon).await;
            info!(%ip, port, "peer added");
        }
        PeerCommand::Rm { ip, port } => {
            config.peers.retain(|p| !(p.ip == ip && p.port == port));
            save_config(&config)?;
            let http = HttpClient::new();
            let daemon = Peer::new("127.0.0.1", config.daemon_port);
            http.notify_peers_change(&daemon).await;
            info!(%ip, port, "peer removed");
        }
        PeerCommand::Ls => {
            let http = HttpClient::new();
            let daemon = Peer::new("127.0.0.1", config.daemon_port);
            let alive = http.get_alive_peers(&daemon).await;
            for p in &config.peers {
                let is_alive = alive.iter().any(|a| a.ip == p.ip && a.port == p.port);
                info!(ip = %p.ip, port = p.port, alive = is_alive, "peer");
            }
        }
    }
    Ok(())
}

fn build_orchestrator(config: &config::HfmcConfig) -> hfmc_core::fetch::FetchOrchestrator {
    let cache_root = config.get_cache_root();
    let cache = Arc::new(FsCacheView::new(&cache_root));
    let etags = Arc::new(EtagStore::new(&cache_root));
    let repo_files = Arc::new(RepoFileListStore::new(&cache_root));
    let http = Arc::new(HttpClient::new());
    let downloader = Arc::new(HfDownloader::new(&cache_root));
    let remote = Arc::new(HfRemoteLookup::new());

    let daemon_port = config.daemon_port;
    let http_for_peers = Arc::clone(&http);
    let get_peers: Arc<
        dyn Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = Vec<Peer>> + Send>> + Send + Sync,
    > = Arc::new(move || {
        let http = Arc::clone(&http_for_peers);
        Box::pin(async move {
            let daemon = Peer::new("127.0.0.1", daemon_port);
            http.get_alive_peers(&daemon).await
        })
    });

    hfmc_core::fetch::FetchOrchestrator::new(cache, etags, repo_files, http, downloader, remote, get_peers)
}

async fn run_model(command: ModelCommand) -> anyhow::Result<()> {
    let config = load_config()?;
    match command {
        ModelCommand::Ls { repo } => {
            let cache = FsCacheView::new(config.get_cache_root());
            match repo {
                Some(repo_id) => {
                    let Some(info) = cache.repo_info(&repo_id) else {
                        info!("no such repo cached");
                        return Ok(());
                    };
                    for rev in info.revisions {
                        for f in rev.files {
                            info!(refs = ?rev.refs, commit = %rev.commit_hash, file = %f, "cached file");
                        }
                    }
                }
                None => {
                    for repo in cache.repo_list() {
                        info!(repo_id = %repo.repo_id, revisions = repo.revisions.len(), "cached repo");
                    }
                }
            }
        }
        ModelCommand::Add { repo, file, revision } => {
            let orchestrator = build_orchestrator(&config);
            let success = match file {
                Some(file) => orchestrator.file_add(&repo, &file, &revision).await,
                None => {
                    if revision == "main" {
                        error!(
                            "in order to keep repo version integrity, specify the exact commit hash with -v when adding a whole repo"
                        );
                        return Ok(());
                    }
                    orchestrator.repo_add(&repo, &revision).await
                }
            };
            if success {
                info!(%repo, "added");
            } else {
                error!(%repo, "failed to add");
            }
        }
        ModelCommand::Rm { repo, file, revision } => {
            let cache = FsCacheView::new(config.get_cache_root());
            let result = match (&file, &revision) {
                (Some(file), Some(revision)) => cache.remove_file(&repo, revision, file),
                (Some(_), None) => {
                    error!("remove file failed, must specify the revision with -v");
                    return Ok(());
                }
                (None, revision) => cache.remove_repo(&repo, revision.as_deref()),
            };
            match result {
                Ok(()) => info!(%repo, "removed"),
                Err(e) => error!(%repo, error = %e, "failed to remove"),
            }
        }
    }
    Ok(())
}

async fn run_config(command: ConfigCommand) -> anyhow::Result<()> {
    match command {
        ConfigCommand::Show => {
            let text = config::config_toml_text()?;
            println!("{text}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    init_logging(&opts)?;

    let result = match opts.command {
        Command::Daemon { command } => match command {
            DaemonCommand::Start { detach } => run_daemon_start(detach).await,
            DaemonCommand::Stop => run_daemon_stop().await,
            DaemonCommand::Status => run_daemon_status().await,
        },
        Command::Peer { command } => run_peer(command).await,
        Command::Model { command } => run_model(command).await,
        Command::Config { command } => run_config(command).await,
    };

    if let Err(e) = &result {
        error!(error = %e, "command failed");
    }
    result
}
