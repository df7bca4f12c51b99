//! Long-lived background tasks.
//!
//! - [`BackgroundWorker`]: a periodic ticker that also accepts on-demand tasks
//!   over an mpsc channel (used by the deadline sweeper).
//! - [`PartitionWorkers`]: the set of per-partition consumer loops spawned by
//!   the reply listener and the responder.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Handler driven by a [`BackgroundWorker`].
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// On-demand task type.
    type Task: Send + 'static;

    async fn run(&mut self, task: Self::Task);

    /// Called on every tick of the worker interval.
    async fn on_tick(&mut self) {}

    /// Called once after the worker loop exits.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Spawned task running a [`BackgroundRunnable`] until stopped.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    name: &'static str,
    tx: Option<mpsc::Sender<R::Task>>,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the worker. The first tick fires one full `tick_interval` after
    /// start, not immediately.
    pub fn start(name: &'static str, mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(64);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => match task {
                        Some(t) => runnable.run(t).await,
                        None => break,
                    },
                    _ = ticker.tick() => runnable.on_tick().await,
                    _ = &mut stop_rx => break,
                }
            }

            runnable.shutdown().await;
            debug!(worker = name, "background worker stopped");
        });

        Self {
            name,
            tx: Some(tx),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Queues an on-demand task.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("{} worker channel closed", self.name)),
            None => Err(anyhow::anyhow!("{} worker not running", self.name)),
        }
    }

    /// Signals the worker to stop and waits for it to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(worker = self.name, error = %e, "background worker panicked");
            }
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

// ---------------------------------------------------------------------------
// PartitionWorkers
// ---------------------------------------------------------------------------

/// Join handles of the per-partition loops of one consumer role.
pub struct PartitionWorkers {
    role: &'static str,
    handles: Vec<(u32, JoinHandle<()>)>,
}

impl PartitionWorkers {
    #[must_use]
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            handles: Vec::new(),
        }
    }

    pub fn push(&mut self, partition: u32, handle: JoinHandle<()>) {
        self.handles.push((partition, handle));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Partitions whose loop is still running.
    #[must_use]
    pub fn running_partitions(&self) -> Vec<u32> {
        self.handles
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(p, _)| *p)
            .collect()
    }

    /// Waits for every loop to exit. Loops exit on shutdown or bus close.
    pub async fn join(self) {
        for (partition, handle) in self.handles {
            if let Err(e) = handle.await {
                warn!(role = self.role, partition, error = %e, "partition worker panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
