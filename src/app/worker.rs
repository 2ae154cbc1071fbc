//! Background worker spawning.
//!
//! Each pipeline stage runs on its own task with its own shutdown channel.
//! Sending `true` lets the current tick finish before the task exits.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::confirmation::ConfirmationTracker;
use super::listener::DepositListener;
use super::sweep::SweepEngine;

/// Handle to a spawned worker
pub struct WorkerHandle {
    pub name: &'static str,
    pub handle: JoinHandle<()>,
    pub shutdown: watch::Sender<bool>,
}

impl WorkerHandle {
    fn spawn<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(run(rx));
        Self {
            name,
            handle,
            shutdown,
        }
    }

    /// Signal shutdown and wait for the task to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(worker = self.name, error = %e, "Worker task panicked");
        }
    }
}

#[must_use]
pub fn spawn_listener(listener: Arc<DepositListener>) -> WorkerHandle {
    WorkerHandle::spawn("listener", move |rx| async move { listener.run(rx).await })
}

#[must_use]
pub fn spawn_confirmation_tracker(tracker: Arc<ConfirmationTracker>) -> WorkerHandle {
    WorkerHandle::spawn("confirmation", move |rx| async move {
        tracker.run(rx).await
    })
}

#[must_use]
pub fn spawn_sweep_engine(engine: Arc<SweepEngine>) -> WorkerHandle {
    WorkerHandle::spawn("sweep", move |rx| async move { engine.run(rx).await })
}
