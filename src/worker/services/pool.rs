//! Runs several consume loops under one shutdown signal.

use mockable::Clock;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::ConsumeLoop;
use crate::task::ports::TaskStore;
use crate::worker::ports::TaskProcessor;

/// Group of background tasks sharing one cancellation token.
///
/// Shutting the pool down cancels the token, then waits for every loop to
/// finish its in-flight delivery and leave its consumer group.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Creates a pool whose tasks stop when `shutdown` is cancelled.
    #[must_use]
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    /// Spawns a consume loop.
    pub fn start<S, P, C>(&self, consume: ConsumeLoop<S, P, C>)
    where
        S: TaskStore + ?Sized + 'static,
        P: TaskProcessor + ?Sized + 'static,
        C: Clock + Send + Sync + 'static,
    {
        let token = self.shutdown.clone();
        self.tracker.spawn(async move { consume.run(&token).await });
    }

    /// Spawns a companion task that should honour [`Self::token`].
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Returns the token tasks in this pool stop on.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of tasks still running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    /// Returns `true` once every task has finished.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Waits until every task has finished on its own or through the token.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Cancels the token and waits for every task to drain.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.wait().await;
    }
}
