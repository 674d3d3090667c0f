//! Background task handles.

use std::{fmt, future::Future};

use tokio::{sync::watch, task::JoinHandle};

/// Holds the shutdown signal sender. Dropping it stops the task.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        // The task may already have exited.
        let _ = self.shutdown_tx.send(());
    }
}

/// Handle to a replication background task.
///
/// Dropping the handle signals the task to stop after its current step.
pub struct TaskHandle {
    name: &'static str,
    guard: ShutdownGuard,
    task: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawns `body` on the current runtime, handing it the shutdown signal.
    pub(crate) fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(watch::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let task = tokio::spawn(body(shutdown_rx));
        Self { name, guard: ShutdownGuard { shutdown_tx }, task }
    }

    /// Whether the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signals the task to stop and waits for it to exit.
    pub async fn shutdown(self) {
        let TaskHandle { name, guard, task } = self;
        drop(guard);
        if let Err(err) = task.await {
            tracing::warn!(task = name, error = %err, "replication task ended abnormally");
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.name)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}
