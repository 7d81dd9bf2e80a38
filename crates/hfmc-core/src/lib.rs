//! Core peer liveness probing, daemon HTTP surface, and fetch
//! orchestration for the hfmc model cache accelerator. The `hfmc`
//! binary is a thin CLI wrapper over this crate.

pub mod api_settings;
pub mod cache;
pub mod config;
pub mod context;
pub mod downloader;
pub mod error;
pub mod fetch;
pub mod http_api;
pub mod http_api_error;
pub mod http_client;
pub mod peer;
pub mod prober;
pub mod remote;

pub use cache::{CacheView, CachedFileInfo, RepoInfo, RevisionInfo};
pub use config::ConfigReader;
pub use context::DaemonContext;
pub use downloader::HfDownloader;
pub use error::{Error, Result};
pub use fetch::{Downloader, FetchOrchestrator, RemoteRepoLookup};
pub use http_api_error::ApiError;
pub use http_client::HttpClient;
pub use peer::Peer;
pub use prober::{PeerProber, ProberStatus, ProbeFn};
pub use remote::HfRemoteLookup;
