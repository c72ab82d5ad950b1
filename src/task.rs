//! Worker-task bookkeeping shared by the layers.

use std::future::Future;

use tokio::{sync::Mutex, task::JoinSet};

/// Tracks every task a layer spawns so `close` can join them all.
///
/// Joining holds the set locked, so a task spawned while a join is in
/// flight is still drained before the join returns.
#[derive(Default)]
pub(crate) struct WorkerSet {
    tasks: Mutex<JoinSet<()>>,
}

impl WorkerSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        self.tasks.lock().await.spawn(task);
    }

    /// Wait for every tracked task to exit.
    pub(crate) async fn join(&self) {
        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
    }
}
