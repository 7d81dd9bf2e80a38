//! Default [`RemoteRepoLookup`]: talks to a hub-compatible REST API to
//! resolve a revision to a commit hash and enumerate a repo's files.

use std::pin::Pin;

use serde::Deserialize;
use tracing::debug;

use crate::api_settings::TIMEOUT_EXISTENCE;
use crate::fetch::RemoteRepoLookup;

#[derive(Deserialize)]
struct ModelInfo {
    sha: Option<String>,
    #[serde(default)]
    siblings: Vec<Sibling>,
}

#[derive(Deserialize)]
struct Sibling {
    rfilename: String,
}

pub struct HfRemoteLookup {
    client: reqwest::Client,
}

impl Default for HfRemoteLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl HfRemoteLookup {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn model_info(&self, endpoint: &str, repo_id: &str, revision: &str) -> Option<ModelInfo> {
        let url = format!("{endpoint}/api/models/{repo_id}?revision={revision}");
        let resp = self
            .client
            .get(&url)
            .timeout(TIMEOUT_EXISTENCE)
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        match resp.json::<ModelInfo>().await {
            Ok(info) => Some(info),
            Err(e) => {
                debug!(error = %e, "malformed model_info response");
                None
            }
        }
    }
}

impl RemoteRepoLookup for HfRemoteLookup {
    fn verify_revision<'a>(
        &'a self,
        repo_id: &'a str,
        revision: &'a str,
        endpoints: &'a [String],
    ) -> Pin<Box<dyn std::future::Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move {
            for endpoint in endpoints {
                if let Some(info) = self.model_info(endpoint, repo_id, revision).await {
                    if let Some(sha) = info.sha {
                        return Some(sha);
                    }
                }
            }
            None
        })
    }

    fn file_list<'a>(
        &'a self,
        endpoint: &'a str,
        repo_id: &'a str,
        revision: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Option<Vec<String>>> + Send + 'a>> {
        Box::pin(async move {
            let info = self.model_info(endpoint, repo_id, revision).await?;
            if info.siblings.is_empty() {
                None
            } else {
                Some(info.siblings.into_iter().map(|s| s.rfilename).collect())
            }
        })
    }
}
