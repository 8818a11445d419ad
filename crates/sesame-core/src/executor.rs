//! Per-device serialized execution of state-mutating tasks.
//!
//! Every sequence that reads and then writes a lock's state runs through
//! [`CommandExecutor::run_exclusive`]. Tasks for the same device run one at a
//! time in admission order; tasks for different devices run concurrently. A
//! task that fails or panics does not hold up the tasks queued behind it.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{Error, Result};

type Job = BoxFuture<'static, ()>;

/// Handle to the outcome of a task admitted to a [`CommandExecutor`].
///
/// Dropping the handle does not cancel the task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Wait for the task to finish.
    ///
    /// Fails with [`Error::TaskFailed`] if the task panicked or the executor
    /// was shut down before it ran.
    pub async fn wait(self) -> Result<T> {
        self.receiver
            .await
            .map_err(|_| Error::TaskFailed("task did not complete".to_string()))
    }
}

/// Serializes tasks per device.
#[derive(Debug)]
pub struct CommandExecutor {
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>,
    shutdown: CancellationToken,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor {
    /// Create an executor with no queues.
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Admit `task` for `device_id`.
    ///
    /// The task starts once every task previously admitted for the same device
    /// has finished. Admission happens before this returns, so the order of
    /// calls is the order of execution.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run_exclusive<F, T>(&self, device_id: &str, task: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, receiver) = oneshot::channel();
        if self.shutdown.is_cancelled() {
            return TaskHandle { receiver };
        }
        let mut job: Job = async move {
            let _ = tx.send(task.await);
        }
        .boxed();

        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let sender = queues
                .entry(device_id.to_string())
                .or_insert_with(|| self.spawn_worker(device_id));
            match sender.send(job) {
                Ok(()) => break,
                Err(mpsc::error::SendError(returned)) => {
                    // The worker is gone; start a fresh one unless shutting down.
                    queues.remove(device_id);
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    job = returned;
                }
            }
        }

        TaskHandle { receiver }
    }

    /// Stop all workers. Queued tasks that have not started are dropped.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of devices with a live queue.
    pub fn queue_count(&self) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn spawn_worker(&self, device_id: &str) -> mpsc::UnboundedSender<Job> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let shutdown = self.shutdown.clone();
        let device_id = device_id.to_string();

        tokio::spawn(async move {
            debug!("Command queue for {} started", device_id);
            loop {
                let job = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    job = rx.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };
                if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                    error!("A task for {} panicked", device_id);
                }
            }
            debug!("Command queue for {} stopped", device_id);
        });

        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::{Instant, sleep};

    #[tokio::test(start_paused = true)]
    async fn test_same_device_runs_in_admission_order() {
        let executor = CommandExecutor::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        // Earlier tasks sleep longer; order must still follow admission.
        let handles: Vec<_> = (0..5u64)
            .map(|i| {
                let order = Arc::clone(&order);
                executor.run_exclusive("dev", async move {
                    sleep(Duration::from_millis(50 * (5 - i))).await;
                    order.lock().unwrap().push(i);
                })
            })
            .collect();

        for handle in handles {
            handle.wait().await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_devices_run_concurrently() {
        let executor = CommandExecutor::new();
        let start = Instant::now();

        let a = executor.run_exclusive("a", sleep(Duration::from_secs(1)));
        let b = executor.run_exclusive("b", sleep(Duration::from_secs(1)));
        a.wait().await.unwrap();
        b.wait().await.unwrap();

        assert!(start.elapsed() < Duration::from_millis(1500));
        assert_eq!(executor.queue_count(), 2);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_block_queue() {
        let executor = CommandExecutor::new();

        let failed = executor.run_exclusive("dev", async {
            panic!("boom");
        });
        let next = executor.run_exclusive("dev", async { 42 });

        assert!(matches!(failed.wait().await, Err(Error::TaskFailed(_))));
        assert_eq!(next.wait().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_failing_task_does_not_block_queue() {
        let executor = CommandExecutor::new();

        let failed = executor.run_exclusive("dev", async {
            Err::<(), _>(Error::RemoteUnavailable("down".to_string()))
        });
        let next = executor.run_exclusive("dev", async { Ok::<_, Error>(1) });

        assert!(failed.wait().await.unwrap().is_err());
        assert_eq!(next.wait().await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drops_pending_tasks() {
        let executor = CommandExecutor::new();
        executor.shutdown();

        let handle = executor.run_exclusive("dev", async { 1 });
        assert!(handle.wait().await.is_err());
        assert_eq!(executor.queue_count(), 0);
    }
}
