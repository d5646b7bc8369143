//! Graceful shutdown coordination via `CancellationToken` + `TaskTracker`.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Default timeout for graceful shutdown before giving up on stragglers.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates graceful shutdown across the server and every stream task.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Get a clone of the root cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token cancelled on shutdown that can also be cancelled on its own.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Spawn a task that shutdown waits for.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Tracked tasks still running.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Perform a graceful shutdown of all tracked tasks.
    ///
    /// 1. Cancel the root token (every stream takes its silent exit path)
    /// 2. Close the tracker so no new task is admitted
    /// 3. Wait up to `timeout` for tracked tasks to finish
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        let _ = self.tracker.close();
        info!(
            task_count = self.tracker.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!(
                remaining = self.tracker.len(),
                "shutdown timed out after {timeout:?}, some tasks may still be running"
            );
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
        assert_eq!(coord.active_tasks(), 0);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let coord = ShutdownCoordinator::new();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
    }

    #[test]
    fn shutdown_cancels_children() {
        let coord = ShutdownCoordinator::new();
        let root = coord.token();
        let child = coord.child_token();
        coord.shutdown();
        assert!(root.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_cancel_does_not_propagate_up() {
        let coord = ShutdownCoordinator::new();
        let child = coord.child_token();
        let sibling = coord.child_token();
        child.cancel();
        assert!(!coord.is_shutting_down());
        assert!(!sibling.is_cancelled());
    }

    #[tokio::test]
    async fn spawned_tasks_are_tracked() {
        let coord = ShutdownCoordinator::new();
        let token = coord.child_token();
        let handle = coord.spawn(async move { token.cancelled().await });
        assert_eq!(coord.active_tasks(), 1);

        coord.shutdown();
        handle.await.unwrap();
        assert_eq!(coord.active_tasks(), 0);
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_all_tasks() {
        let coord = ShutdownCoordinator::new();
        for _ in 0..3 {
            let token = coord.child_token();
            let _ = coord.spawn(async move {
                token.cancelled().await;
                tokio::task::yield_now().await;
            });
        }

        coord.graceful_shutdown(None).await;
        assert!(coord.is_shutting_down());
        assert_eq!(coord.active_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();

        // Ignores cancellation.
        let _ = coord.spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        let started = tokio::time::Instant::now();
        coord
            .graceful_shutdown(Some(Duration::from_millis(100)))
            .await;
        assert!(coord.is_shutting_down());
        assert!(started.elapsed() < Duration::from_secs(300));
        assert_eq!(coord.active_tasks(), 1);
    }
}
