use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::app::model::{JobRecord, JobStatus};

pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type WorkItem = Box<dyn FnOnce(CancellationToken) -> JobFuture + Send>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("job queue is closed")]
    Closed,
    #[error("dequeue cancelled")]
    Cancelled,
}

/// A dequeued unit of work and the id of its record.
pub struct QueuedJob {
    pub job_id: Uuid,
    work: WorkItem,
}

impl QueuedJob {
    pub fn run(self, cancel: CancellationToken) -> JobFuture {
        (self.work)(cancel)
    }
}

impl std::fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedJob")
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

/// Bounded FIFO of deferred work plus the table of job records.
///
/// Any number of producers may enqueue; a single consumer dequeues.
pub struct JobQueue {
    sender: Mutex<Option<mpsc::Sender<QueuedJob>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<QueuedJob>>,
    records: DashMap<Uuid, JobRecord>,
    next_seq: AtomicU64,
    stopped: CancellationToken,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            records: DashMap::new(),
            next_seq: AtomicU64::new(0),
            stopped: CancellationToken::new(),
        }
    }

    /// Registers a `Queued` record and pushes the work item. Waits while the
    /// buffer is full, and fails with `Closed` if the queue shuts down in the
    /// meantime. Dropping the returned future leaves neither a record nor an
    /// item behind.
    pub async fn enqueue<F, Fut>(
        &self,
        label: impl Into<String>,
        chapter_number: f64,
        work: F,
    ) -> Result<Uuid, QueueError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(QueueError::Closed)?;

        let permit = tokio::select! {
            biased;
            _ = self.stopped.cancelled() => return Err(QueueError::Closed),
            permit = sender.reserve() => permit.map_err(|_| QueueError::Closed)?,
        };

        let job_id = Uuid::new_v4();
        self.records.insert(
            job_id,
            JobRecord {
                job_id,
                label: label.into(),
                chapter_number,
                status: JobStatus::Queued,
                enqueued_at: Utc::now(),
                seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            },
        );

        let work: WorkItem = Box::new(move |cancel| Box::pin(work(cancel)));
        permit.send(QueuedJob { job_id, work });
        Ok(job_id)
    }

    /// Waits for the next item in enqueue order. Returns `Closed` once the
    /// queue was closed and drained.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Result<QueuedJob, QueueError> {
        let mut receiver = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            receiver = self.receiver.lock() => receiver,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
            job = receiver.recv() => job.ok_or(QueueError::Closed),
        }
    }

    /// No-op when the record is already gone.
    pub fn update_status(&self, job_id: Uuid, status: JobStatus) {
        if let Some(mut record) = self.records.get_mut(&job_id) {
            record.status = status;
        }
    }

    pub fn remove(&self, job_id: Uuid) -> Option<JobRecord> {
        self.records.remove(&job_id).map(|(_, record)| record)
    }

    pub fn clear_failed(&self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !record.status.is_failed());
        before.saturating_sub(self.records.len())
    }

    /// Snapshot of every record, oldest first.
    pub fn list_jobs(&self) -> Vec<JobRecord> {
        let mut jobs = self
            .records
            .iter()
            .map(|record| record.value().clone())
            .collect::<Vec<_>>();
        jobs.sort_by(|a, b| {
            a.enqueued_at
                .cmp(&b.enqueued_at)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        jobs
    }

    pub fn get(&self, job_id: Uuid) -> Option<JobRecord> {
        self.records.get(&job_id).map(|record| record.value().clone())
    }

    /// Stops accepting work. Already queued items are still handed out.
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    /// Closes the queue and fails every producer still waiting for buffer
    /// space. Used once nothing will dequeue anymore.
    pub fn shutdown(&self) {
        self.close();
        self.stopped.cancel();
    }
}
