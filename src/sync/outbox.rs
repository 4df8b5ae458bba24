//! In-process propagation outbox.
//!
//! The primary write commits synchronously; downstream propagation
//! (mirror refresh after a canonical edit, mirror withdrawal after a
//! canonical delete) is enqueued here and executed by a single worker
//! task. Failures are logged, never retried inline; re-running the
//! idempotent merge operations later converges to the same state. The
//! queue is in-memory only: per-instance, lost on shutdown.

use std::future::Future;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::Result;

/// One enqueued propagation task.
struct PropagationTask {
    description: String,
    run: BoxFuture<'static, Result<()>>,
}

/// Handle to the outbox worker.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<PropagationTask>,
}

impl Outbox {
    /// Spawn the worker task and return a handle to enqueue against.
    pub fn start() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PropagationTask>();

        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                debug!(task = %task.description, "Running propagation task");
                if let Err(e) = task.run.await {
                    warn!(
                        task = %task.description,
                        error = %e,
                        "Propagation task failed; state will converge on the next trigger"
                    );
                }
            }
            debug!("Outbox channel closed, worker exiting");
        });

        Self { tx }
    }

    /// Enqueue a propagation future. Dropped (and logged) if the worker is
    /// gone, which only happens during shutdown.
    pub fn enqueue<F>(&self, description: impl Into<String>, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let description = description.into();
        let task = PropagationTask {
            description: description.clone(),
            run: Box::pin(fut),
        };
        if self.tx.send(task).is_err() {
            warn!(task = %description, "Outbox closed; propagation task dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_enqueued_tasks_run_in_order() {
        let outbox = Outbox::start();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = Arc::clone(&log);
            outbox.enqueue(format!("task-{}", i), async move {
                log.lock().unwrap().push(i);
                Ok(())
            });
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failed_task_does_not_stop_worker() {
        let outbox = Outbox::start();
        let ran = Arc::new(AtomicUsize::new(0));

        outbox.enqueue("failing", async {
            Err(crate::types::SyncError::Database("down".into()))
        });
        let ran_clone = Arc::clone(&ran);
        outbox.enqueue("following", async move {
            ran_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
