use log::debug;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, Duration, MissedTickBehavior};

/// A background loop that runs `job` every `period` until stopped.
///
/// The first run happens immediately. With [`spawn`](Self::spawn) runs are
/// serialised: a slow run delays the next tick instead of bunching missed
/// ticks together. With [`spawn_detached`](Self::spawn_detached) every tick
/// starts its run on its own task, so the schedule never waits on a run.
pub struct RecurringTask {
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RecurringTask {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => job().await,
                }
            }
            debug!("Recurring task '{}' stopped", name);
        });

        debug!("Recurring task '{}' started every {:?}", name, period);
        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Like [`spawn`](Self::spawn), but runs overlap when one outlasts the
    /// period. Runs still in flight are aborted when the task stops.
    pub fn spawn_detached<F, Fut>(name: &'static str, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut runs = JoinSet::new();
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        runs.spawn(job());
                    }
                    Some(_) = runs.join_next(), if !runs.is_empty() => {}
                }
            }
            runs.shutdown().await;
            debug!("Recurring task '{}' stopped", name);
        });

        debug!("Recurring task '{}' started every {:?} (detached runs)", name, period);
        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop the loop and wait for it to wind down.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RecurringTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
