//! Task group with bounded-drain shutdown.

use super::CancelToken;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// A set of related tasks sharing one cancellation token.
///
/// Shutdown cancels the token, then waits for each task to drain within the
/// remaining grace window; stragglers are force-aborted.
pub struct TaskGroup {
    /// The token handed to every spawned task.
    cancel: Arc<CancelToken>,
    /// Named handles of spawned tasks.
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl TaskGroup {
    /// Creates a group whose token is a child of `parent`.
    #[must_use]
    pub fn new(parent: &Arc<CancelToken>) -> Self {
        Self {
            cancel: parent.child(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Returns the group's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancelToken> {
        &self.cancel
    }

    /// Spawns a task in the group.
    ///
    /// The task receives the group token and must honor it at every
    /// suspension point.
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, task: F)
    where
        F: FnOnce(Arc<CancelToken>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.cancel.clone();
        let handle = tokio::spawn(task(token));
        self.handles.lock().push((name.into(), handle));
    }

    /// Returns the number of spawned tasks not yet reaped.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.handles.lock().len()
    }

    /// Cancels the group and drains tasks within `grace`.
    ///
    /// Tasks that have not finished when the window closes are aborted.
    pub async fn shutdown(&self, reason: &str, grace: Duration) {
        self.cancel.cancel(reason);

        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        let deadline = tokio::time::Instant::now() + grace;

        for (name, mut handle) in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) => {
                    if !join_error.is_cancelled() {
                        warn!(task = %name, error = %join_error, "task failed during drain");
                    }
                }
                Err(_) => {
                    warn!(task = %name, "task exceeded drain window, aborting");
                    handle.abort();
                }
            }
        }
    }
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("task_count", &self.task_count())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
