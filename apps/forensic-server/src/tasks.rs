use std::{borrow::Cow, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug)]
pub struct TaskHandle {
    name: Cow<'static, str>,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn new(name: impl Into<Cow<'static, str>>, handle: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn into_inner(self) -> (Cow<'static, str>, JoinHandle<()>) {
        (self.name, self.handle)
    }
}

/// Background tasks owned by the server; drained on shutdown.
#[derive(Default)]
pub struct TaskManager {
    tasks: Vec<TaskHandle>,
    cancel: CancellationToken,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn push(&mut self, task: TaskHandle) {
        trace!(task = task.name(), "task registered");
        self.tasks.push(task);
    }

    /// Signals shutdown, then waits up to `grace` for each task to finish before aborting it.
    pub async fn shutdown_with_grace(self, grace: Duration) {
        self.cancel.cancel();
        for task in self.tasks {
            let (name, mut handle) = task.into_inner();
            if grace.is_zero() {
                handle.abort();
                if let Err(err) = handle.await {
                    debug!(task = %name, ?err, "task join after abort failed");
                }
                continue;
            }

            let sleeper = tokio::time::sleep(grace);
            tokio::pin!(sleeper);
            tokio::select! {
                res = &mut handle => {
                    if let Err(err) = res {
                        debug!(task = %name, ?err, "task exited with error");
                    }
                }
                _ = &mut sleeper => {
                    handle.abort();
                    if let Err(err) = handle.await {
                        debug!(task = %name, ?err, "task join after abort failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finished_tasks_are_joined_within_grace() {
        let mut manager = TaskManager::new();
        manager.push(TaskHandle::new("quick", tokio::spawn(async {})));
        manager.shutdown_with_grace(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn stuck_tasks_are_aborted_after_grace() {
        let mut manager = TaskManager::new();
        manager.push(TaskHandle::new(
            "stuck",
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }),
        ));
        let started = std::time::Instant::now();
        manager.shutdown_with_grace(Duration::from_millis(20)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn shutdown_token_fires_before_waiting() {
        let mut manager = TaskManager::new();
        let token = manager.shutdown_token();
        manager.push(TaskHandle::new(
            "cooperative",
            tokio::spawn(async move { token.cancelled().await }),
        ));
        let started = std::time::Instant::now();
        manager.shutdown_with_grace(Duration::from_secs(10)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
