//! Work that is acknowledged before it runs.

use std::future::Future;
use tokio::{
    sync::Mutex,
    task::{JoinError, JoinSet},
};
use tracing::error;

/// Tracked background tasks. Finished tasks are reaped on every spawn.
#[derive(Default)]
pub struct Deferred {
    tasks: Mutex<JoinSet<()>>,
}

impl Deferred {
    pub async fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.try_join_next() {
            report(result);
        }
        tasks.spawn(task);
    }

    /// Wait for every task spawned so far.
    pub async fn settle(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            report(result);
        }
    }
}

fn report(result: Result<(), JoinError>) {
    if let Err(err) = result {
        error!("deferred task failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[tokio::test]
    async fn settle_waits_for_spawned_work() {
        let deferred = Deferred::default();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = Arc::clone(&done);
            deferred
                .spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        }
        assert!(done.load(Ordering::SeqCst) < 3);
        deferred.settle().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn panicking_task_does_not_poison_settle() {
        let deferred = Deferred::default();
        deferred.spawn(async { panic!("boom") }).await;
        deferred.settle().await;
        deferred.spawn(async {}).await;
        deferred.settle().await;
    }
}
