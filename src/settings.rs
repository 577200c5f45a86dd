use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;

pub const ENV_MAX_PARALLEL_DOWNLOADS: &str = "MANGA_SYNC_MAX_PARALLEL_DOWNLOADS";
pub const ENV_QUEUE_CAPACITY: &str = "MANGA_SYNC_QUEUE_CAPACITY";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "MANGA_SYNC_HTTP_TIMEOUT_SECS";
pub const ENV_USER_AGENT: &str = "MANGA_SYNC_USER_AGENT";

pub const DEFAULT_MAX_PARALLEL_DOWNLOADS: usize = 5;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub image_dir: PathBuf,
    pub providers_dir: PathBuf,
    pub max_parallel_downloads: usize,
    pub queue_capacity: usize,
    pub user_agent: String,
    pub http_timeout: Duration,
}

impl Settings {
    pub fn new(data_dir: PathBuf, image_dir: Option<PathBuf>, providers_dir: PathBuf) -> Self {
        let image_dir = image_dir.unwrap_or_else(|| data_dir.join("images"));
        Self {
            data_dir,
            image_dir,
            providers_dir,
            max_parallel_downloads: DEFAULT_MAX_PARALLEL_DOWNLOADS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            user_agent: default_user_agent(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Applies `MANGA_SYNC_*` overrides from the process environment.
    pub fn with_env(self) -> anyhow::Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        if let Some(raw) = non_empty(lookup(ENV_MAX_PARALLEL_DOWNLOADS)) {
            self.max_parallel_downloads = parse_count(ENV_MAX_PARALLEL_DOWNLOADS, &raw)?;
        }
        if let Some(raw) = non_empty(lookup(ENV_QUEUE_CAPACITY)) {
            self.queue_capacity = parse_count(ENV_QUEUE_CAPACITY, &raw)?;
        }
        if let Some(raw) = non_empty(lookup(ENV_HTTP_TIMEOUT_SECS)) {
            let secs = raw
                .parse::<u64>()
                .with_context(|| format!("invalid {ENV_HTTP_TIMEOUT_SECS}={raw:?}"))?;
            if secs == 0 {
                anyhow::bail!("invalid {ENV_HTTP_TIMEOUT_SECS}={raw:?}: must be at least 1");
            }
            self.http_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = non_empty(lookup(ENV_USER_AGENT)) {
            self.user_agent = raw;
        }
        Ok(self)
    }
}

fn default_user_agent() -> String {
    format!("manga-sync/{}", env!("CARGO_PKG_VERSION"))
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Counts below one are clamped to one.
fn parse_count(name: &str, raw: &str) -> anyhow::Result<usize> {
    let value = raw
        .parse::<usize>()
        .with_context(|| format!("invalid {name}={raw:?}: expected a non-negative integer"))?;
    Ok(value.max(1))
}
