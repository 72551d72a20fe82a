//! Run-scoped context: run id, cancellation and the scheduler session.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use linker_types::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::scheduler::BatchScheduler;

/// Owns everything that must be torn down exactly once when a run ends.
pub struct RunSession {
    id: Uuid,
    cancel: CancellationToken,
    scheduler: Option<Arc<dyn BatchScheduler>>,
    closed: AtomicBool,
    /// Cluster terminations still in flight.
    releases: Mutex<Vec<JoinHandle<()>>>,
}

impl RunSession {
    pub fn new(scheduler: Option<Arc<dyn BatchScheduler>>) -> Self {
        let id = Uuid::new_v4();
        tracing::info!(run_id = %id, scheduler = scheduler.is_some(), "run session opened");
        Self {
            id,
            cancel: CancellationToken::new(),
            scheduler,
            closed: AtomicBool::new(false),
            releases: Mutex::new(Vec::new()),
        }
    }

    pub fn local() -> Self {
        Self::new(None)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Token that aborts the run when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Remember a background cluster termination so `close` can wait for it.
    pub fn track(&self, task: JoinHandle<()>) {
        self.releases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(task);
    }

    /// Wait for pending cluster terminations and close the scheduler session.
    /// Only the first call does anything.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let pending = std::mem::take(
            &mut *self
                .releases
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for task in pending {
            if let Err(e) = task.await {
                tracing::warn!(run_id = %self.id, error = %e, "cluster termination task failed");
            }
        }

        if let Some(scheduler) = &self.scheduler {
            scheduler.close().await?;
        }
        tracing::info!(run_id = %self.id, "run session closed");
        Ok(())
    }

    /// Run `work`, then close the session whatever the outcome. An error from
    /// `work` takes precedence over an error from closing.
    pub async fn scope<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = work.await;
        let closed = self.close().await;
        match (outcome, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                tracing::warn!(run_id = %self.id, error = %close_err, "failed to close run session");
                Err(e)
            }
        }
    }
}

impl Drop for RunSession {
    fn drop(&mut self) {
        if !self.is_closed() {
            tracing::warn!(run_id = %self.id, "run session dropped without being closed");
        }
    }
}
