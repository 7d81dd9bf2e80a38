//! Default [`Downloader`] implementation: a streaming GET against a
//! peer or public-mirror endpoint that lands bytes straight into the
//! `FsCacheView` blob/snapshot layout.

use std::path::PathBuf;

use futures::StreamExt;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::api_settings::{resolve_path, TIMEOUT_FETCH};
use crate::cache::fs::FsCacheView;
use crate::error::{Error, Result};
use crate::fetch::Downloader;

pub struct HfDownloader {
    client: reqwest::Client,
    models_root: PathBuf,
}

impl HfDownloader {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            models_root: cache_root.into().join("models"),
        }
    }

    fn snapshot_link_path(&self, repo_id: &str, revision: &str, file: &str) -> PathBuf {
        self.models_root
            .join(FsCacheView::repo_dir_name(repo_id))
            .join("snapshots")
            .join(revision)
            .join(file)
    }

    fn blob_path(&self, repo_id: &str, blob_id: &str) -> PathBuf {
        self.models_root
            .join(FsCacheView::repo_dir_name(repo_id))
            .join("blobs")
            .join(blob_id)
    }

    async fn download_into_cache(
        &self,
        endpoint: &str,
        repo_id: &str,
        revision: &str,
        file: &str,
    ) -> Result<()> {
        let url = format!("{endpoint}/{}", resolve_path(repo_id, revision, file));
        let resp = self
            .client
            .get(&url)
            .timeout(TIMEOUT_FETCH)
            .send()
            .await
            .map_err(|e| Error::transport(endpoint, e))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::unauthorized(format!(
                "{endpoint} refused {repo_id}@{revision}/{file} ({status}): repo is gated, run `hfmc auth login`"
            )));
        }
        let resp = resp.error_for_status().map_err(|e| Error::transport(endpoint, e))?;

        let blob_id = resp
            .headers()
            .get("X-Linked-ETag")
            .or_else(|| resp.headers().get("ETag"))
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim_matches('"').to_string())
            .unwrap_or_else(|| format!("{repo_id}-{revision}-{file}").replace(['/', ':'], "_"));

        let blob_path = self.blob_path(repo_id, &blob_id);
        if let Some(parent) = blob_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::transport(endpoint, e))?;
        }

        let mut out = tokio::fs::File::create(&blob_path)
            .await
            .map_err(|e| Error::transport(endpoint, e))?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::transport(endpoint, e))?;
            out.write_all(&chunk).await.map_err(|e| Error::transport(endpoint, e))?;
        }
        out.flush().await.map_err(|e| Error::transport(endpoint, e))?;

        let link_path = self.snapshot_link_path(repo_id, revision, file);
        if let Some(parent) = link_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::transport(endpoint, e))?;
        }
        if tokio::fs::symlink_metadata(&link_path).await.is_ok() {
            tokio::fs::remove_file(&link_path)
                .await
                .map_err(|e| Error::transport(endpoint, e))?;
        }
        #[cfg(unix)]
        tokio::fs::symlink(&blob_path, &link_path)
            .await
            .map_err(|e| Error::transport(endpoint, e))?;
        #[cfg(not(unix))]
        tokio::fs::copy(&blob_path, &link_path)
            .await
            .map(|_| ())
            .map_err(|e| Error::transport(endpoint, e))?;

        Ok(())
    }
}

impl Downloader for HfDownloader {
    fn download_file<'a>(
        &'a self,
        endpoint: &'a str,
        repo_id: &'a str,
        revision: &'a str,
        file: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let result = self.download_into_cache(endpoint, repo_id, revision, file).await;
            if let Err(e) = &result {
                debug!(endpoint, file, error = %e, "download attempt failed");
            }
            result
        })
    }
}
