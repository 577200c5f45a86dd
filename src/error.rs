use thiserror::Error;

/// Failure taxonomy shared by the merge, the chapter page job and the
/// materializer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("parse: {0}")]
    Parse(String),

    #[error("catalog entry already exists: {0}")]
    Conflict(String),

    #[error("provider config: {0}")]
    Config(String),

    #[error("image codec: {0}")]
    Decode(String),

    #[error("cancelled")]
    Cancelled,

    #[error("storage: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl SyncError {
    pub fn fetch(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|url| url.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if err.is_timeout() {
            return Self::fetch(url, "request timed out");
        }
        if let Some(status) = err.status() {
            return Self::fetch(url, format!("http status {status}"));
        }
        Self::fetch(url, err)
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
