use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Successful jobs are removed from the table, so there is no `Done`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Failed(String),
}

impl JobStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub label: String,
    pub chapter_number: f64,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,

    #[serde(skip)]
    pub(crate) seq: u64,
}
