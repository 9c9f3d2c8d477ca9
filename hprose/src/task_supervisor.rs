use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};

#[derive(Debug, Default)]
struct TaskSupervisorState {
    running: AtomicU64,
    /// Cancelled when stop is requested.
    stop: CancellationToken,
    /// Cancelled when the last task has finished.
    stopped: CancellationToken,
}

impl TaskSupervisorState {
    fn start_async_task(self: &Arc<Self>) -> TaskSupervisorGuard {
        self.running.fetch_add(1, Ordering::AcqRel);
        TaskSupervisorGuard(self.clone())
    }

    fn finish_async_task(&self) {
        let running = self.running.fetch_sub(1, Ordering::AcqRel) - 1;
        if running == 0 {
            self.stopped.cancel();
        }
    }
}

/// Tracks the accept loops and connection tasks of a service so that they
/// can be stopped together and awaited.
///
/// Dropping the supervisor requests stop.
///
/// # Examples
///
/// ```rust
/// # use hprose::TaskSupervisor;
/// # #[tokio::main]
/// # async fn main() {
/// let supervisor = TaskSupervisor::create();
/// supervisor
///     .start_async_task()
///     .spawn(|stop| async move { stop.cancelled().await });
/// supervisor.stop();
/// supervisor.all_stopped().await;
/// # }
/// ```
#[derive(Debug)]
pub struct TaskSupervisor(Arc<TaskSupervisorState>);

/// Keeps the supervisor's running count raised while alive.
#[derive(Debug)]
pub struct TaskSupervisorGuard(Arc<TaskSupervisorState>);

impl TaskSupervisor {
    /// Must be called inside a tokio runtime: one guard task is spawned that
    /// lives until stop is requested.
    #[must_use]
    pub fn create() -> Self {
        let supervisor = Self(Arc::default());

        let guard = supervisor.start_async_task();
        tokio::spawn(async move {
            guard.stopped().await;
        });

        supervisor
    }

    /// Requests stop. Tracked tasks see it through their stop token; use
    /// [`all_stopped`](Self::all_stopped) to wait for them.
    pub fn stop(&self) {
        self.0.stop.cancel();
    }

    /// A guard that requests stop when dropped.
    #[must_use]
    pub fn drop_guard(&self) -> DropGuard {
        self.0.stop.clone().drop_guard()
    }

    /// Completes once stop was requested.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stop.cancelled()
    }

    /// Completes when stop was requested and every tracked task is done.
    pub fn all_stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stopped.cancelled()
    }

    /// Starts tracking a task.
    ///
    /// # Returns
    ///
    /// A guard that keeps [`all_stopped`](Self::all_stopped) pending until
    /// it is dropped.
    #[must_use]
    pub fn start_async_task(&self) -> TaskSupervisorGuard {
        self.0.start_async_task()
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl TaskSupervisorGuard {
    /// Completes once stop was requested.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stop.cancelled()
    }

    /// Token cancelled when stop is requested.
    #[must_use]
    pub fn stop_token(&self) -> CancellationToken {
        self.0.stop.clone()
    }

    /// Another guard on the same supervisor, for a task started from this one.
    #[must_use]
    pub fn fork(&self) -> TaskSupervisorGuard {
        self.0.start_async_task()
    }

    /// Runs the future built by `f` in a new task that holds this guard
    /// until the future finishes.
    ///
    /// `f` receives the stop token. The task is never abandoned: it is
    /// expected to wind down on its own once the token is cancelled.
    pub fn spawn<F, Fut>(self, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fut = f(self.stop_token());
        tokio::spawn(async move {
            fut.await;
            drop(self);
        });
    }
}

impl Drop for TaskSupervisorGuard {
    fn drop(&mut self) {
        self.0.finish_async_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_task_supervisor() {
        let task_supervisor = TaskSupervisor::create();
        assert_eq!(task_supervisor.0.running.load(Ordering::Acquire), 1);

        let guard = task_supervisor.start_async_task();
        let (tx, rx) = tokio::sync::oneshot::channel();
        guard.fork().spawn(|stop| async move {
            stop.cancelled().await;
            // Cleanup after stop still runs.
            let _ = tx.send(());
        });
        assert_eq!(task_supervisor.0.running.load(Ordering::Acquire), 3);

        task_supervisor.stop();
        task_supervisor.stopped().await;
        drop(guard);
        task_supervisor.all_stopped().await;
        assert_eq!(rx.await, Ok(()));
        assert_eq!(task_supervisor.0.running.load(Ordering::Acquire), 0);
    }
}
