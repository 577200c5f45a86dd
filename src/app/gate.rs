use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{SyncError, SyncResult};

/// Process-wide admission gate bounding simultaneous image downloads,
/// shared by every chapter job.
#[derive(Debug, Clone)]
pub struct DownloadGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl DownloadGate {
    pub fn new(capacity: usize) -> Self {
        let permits = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            capacity: permits,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for a permit, runs `fut` and releases the permit whether it
    /// succeeded or not.
    pub async fn run<F, T>(&self, fut: F) -> SyncResult<T>
    where
        F: Future<Output = T>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SyncError::Cancelled)?;
        Ok(fut.await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn zero_capacity_is_clamped() {
        let gate = DownloadGate::new(0);
        assert_eq!(gate.capacity(), 1);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn never_admits_more_than_capacity() -> anyhow::Result<()> {
        let gate = DownloadGate::new(3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..20 {
            let gate = gate.clone();
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            tasks.spawn(async move {
                gate.run(async {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined??;
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.available(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn permit_is_released_after_failure() -> anyhow::Result<()> {
        let gate = DownloadGate::new(1);
        let result: Result<(), &str> = gate.run(async { Err("boom") }).await?;
        assert!(result.is_err());
        assert_eq!(gate.available(), 1);
        Ok(())
    }
}
