use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::app::model::JobStatus;
use crate::app::queue::{JobQueue, QueueError, QueuedJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Executing,
    Stopped,
}

/// Single consumer of the job queue. Executes one item at a time, in
/// enqueue order, until cancelled or until the queue is closed and drained.
pub struct JobRunner {
    queue: Arc<JobQueue>,
    state: watch::Sender<RunnerState>,
}

impl JobRunner {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        let (state, _) = watch::channel(RunnerState::Idle);
        Self { queue, state }
    }

    pub fn state(&self) -> RunnerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunnerState> {
        self.state.subscribe()
    }

    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!("job runner starting");
        loop {
            self.state.send_replace(RunnerState::Idle);
            let job = match self.queue.dequeue(&cancel).await {
                Ok(job) => job,
                Err(QueueError::Cancelled) => {
                    tracing::info!("job runner cancelled");
                    break;
                }
                Err(QueueError::Closed) => {
                    tracing::info!("job queue closed and drained");
                    break;
                }
            };

            self.state.send_replace(RunnerState::Executing);
            self.execute(job, &cancel).await;
            if cancel.is_cancelled() {
                tracing::info!("job runner cancelled");
                break;
            }
        }
        self.queue.shutdown();
        self.state.send_replace(RunnerState::Stopped);
        tracing::info!("job runner stopped");
    }

    async fn execute(&self, job: QueuedJob, cancel: &CancellationToken) {
        let job_id = job.job_id;
        self.queue.update_status(job_id, JobStatus::Running);
        tracing::info!(%job_id, "job started");

        let outcome = tokio::spawn(job.run(cancel.child_token())).await;
        match outcome {
            Ok(Ok(())) => {
                self.queue.remove(job_id);
                tracing::info!(%job_id, "job finished");
            }
            Ok(Err(err)) if cancel.is_cancelled() => {
                tracing::warn!(%job_id, error = %format!("{err:#}"), "job interrupted by shutdown");
            }
            Ok(Err(err)) => {
                tracing::error!(%job_id, ?err, "job failed");
                self.queue
                    .update_status(job_id, JobStatus::Failed(format!("{err:#}")));
            }
            Err(join_err) if join_err.is_panic() => {
                tracing::error!(%job_id, "job panicked");
                self.queue
                    .update_status(job_id, JobStatus::Failed("job panicked".to_string()));
            }
            Err(join_err) => {
                tracing::warn!(%job_id, error = %join_err, "job task aborted");
                self.queue
                    .update_status(job_id, JobStatus::Failed(join_err.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    async fn panicking(_: CancellationToken) -> anyhow::Result<()> {
        panic!("boom")
    }

    async fn failing(_: CancellationToken) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("connection refused").context("fetch chapter"))
    }

    #[tokio::test]
    async fn failed_job_is_recorded_and_runner_continues() -> anyhow::Result<()> {
        let queue = Arc::new(JobQueue::new(8));
        let ran = Arc::new(AtomicUsize::new(0));

        let failed = queue.enqueue("A", 1.0, failing).await?;
        let ok = {
            let ran = Arc::clone(&ran);
            queue
                .enqueue("A", 2.0, move |_| async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(())
                })
                .await?
        };
        queue.close();

        let runner = JobRunner::new(Arc::clone(&queue));
        runner.run(CancellationToken::new()).await;

        assert_eq!(runner.state(), RunnerState::Stopped);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(queue.get(ok).is_none());
        assert_eq!(
            queue.get(failed).map(|job| job.status),
            Some(JobStatus::Failed(
                "fetch chapter: connection refused".to_string()
            ))
        );
        Ok(())
    }

    #[tokio::test]
    async fn executes_one_job_at_a_time_in_order() -> anyhow::Result<()> {
        let queue = Arc::new(JobQueue::new(32));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..10_u32 {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            let order = Arc::clone(&order);
            queue
                .enqueue("T", f64::from(i), move |_| async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    order.lock().unwrap().push(i);
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(())
                })
                .await?;
        }
        queue.close();

        JobRunner::new(Arc::clone(&queue))
            .run(CancellationToken::new())
            .await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
        assert!(queue.list_jobs().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn panicking_job_is_marked_failed() -> anyhow::Result<()> {
        let queue = Arc::new(JobQueue::new(4));
        let id = queue.enqueue("P", 1.0, panicking).await?;
        queue.close();

        JobRunner::new(Arc::clone(&queue))
            .run(CancellationToken::new())
            .await;

        assert_eq!(
            queue.get(id).map(|job| job.status),
            Some(JobStatus::Failed("job panicked".to_string()))
        );
        Ok(())
    }

    #[tokio::test]
    async fn idle_runner_stops_on_cancel() {
        let queue = Arc::new(JobQueue::new(4));
        let runner = Arc::new(JobRunner::new(queue));
        let cancel = CancellationToken::new();

        let handle = {
            let runner = Arc::clone(&runner);
            let cancel = cancel.clone();
            tokio::spawn(async move { runner.run(cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runner.state(), RunnerState::Idle);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("runner stops promptly")
            .expect("runner task");
        assert_eq!(runner.state(), RunnerState::Stopped);
    }

    #[tokio::test]
    async fn shutdown_during_job_leaves_status_untouched() -> anyhow::Result<()> {
        let queue = Arc::new(JobQueue::new(4));
        let id = queue
            .enqueue("S", 1.0, |cancel: CancellationToken| async move {
                cancel.cancelled().await;
                Err::<(), _>(anyhow::anyhow!("interrupted"))
            })
            .await?;
        let next = queue.enqueue("S", 2.0, failing).await?;

        let runner = Arc::new(JobRunner::new(Arc::clone(&queue)));
        let mut state = runner.subscribe();
        let cancel = CancellationToken::new();
        let handle = {
            let runner = Arc::clone(&runner);
            let cancel = cancel.clone();
            tokio::spawn(async move { runner.run(cancel).await })
        };

        state
            .wait_for(|state| *state == RunnerState::Executing)
            .await?;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await??;

        assert_eq!(queue.get(id).map(|job| job.status), Some(JobStatus::Running));
        assert_eq!(queue.get(next).map(|job| job.status), Some(JobStatus::Queued));
        Ok(())
    }

    #[tokio::test]
    async fn stopped_runner_fails_waiting_and_later_producers() -> anyhow::Result<()> {
        let queue = Arc::new(JobQueue::new(1));
        let started = CancellationToken::new();
        {
            let started = started.clone();
            queue
                .enqueue("W", 1.0, move |cancel: CancellationToken| async move {
                    started.cancel();
                    cancel.cancelled().await;
                    Ok::<_, anyhow::Error>(())
                })
                .await?;
        }
        let runner = Arc::new(JobRunner::new(Arc::clone(&queue)));
        let cancel = CancellationToken::new();
        let handle = {
            let runner = Arc::clone(&runner);
            let cancel = cancel.clone();
            tokio::spawn(async move { runner.run(cancel).await })
        };
        started.cancelled().await;
        queue.enqueue("W", 2.0, failing).await?;

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue("W", 3.0, failing).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await??;
        let waiting = tokio::time::timeout(Duration::from_secs(1), producer).await??;
        assert_eq!(waiting.unwrap_err(), QueueError::Closed);

        let later = tokio::time::timeout(Duration::from_secs(1), queue.enqueue("W", 4.0, failing))
            .await?;
        assert_eq!(later.unwrap_err(), QueueError::Closed);
        let numbers = queue
            .list_jobs()
            .iter()
            .map(|job| job.chapter_number)
            .collect::<Vec<_>>();
        assert_eq!(numbers, vec![2.0]);
        Ok(())
    }
}
