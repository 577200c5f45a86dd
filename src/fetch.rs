use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};

use crate::error::{SyncError, SyncResult};

/// Network access used by the merge, the chapter page job and the
/// materializer.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> SyncResult<String>;
    async fn fetch_bytes(&self, url: &str) -> SyncResult<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|err| anyhow::anyhow!("build http client: {err}"))?;
        Ok(Self {
            client,
            user_agent: user_agent.into(),
        })
    }

    async fn get(&self, url: &str, accept: &str) -> SyncResult<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, accept)
            .send()
            .await
            .map_err(|err| SyncError::fetch(url, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::fetch(url, format!("http status {status}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> SyncResult<String> {
        let response = self
            .get(url, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .await?;
        response
            .text()
            .await
            .map_err(|err| SyncError::fetch(url, format!("read body: {err}")))
    }

    async fn fetch_bytes(&self, url: &str) -> SyncResult<Vec<u8>> {
        let response = self.get(url, "image/*,*/*;q=0.8").await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| SyncError::fetch(url, format!("read body: {err}")))?;
        Ok(bytes.to_vec())
    }
}
