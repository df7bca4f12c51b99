//! Deadline sweeper: expires pending calls whose caller stopped watching.
//!
//! Callers normally expire their own entry when `wait()` hits the deadline.
//! The sweeper is the backstop for entries registered by callers that never
//! reached `wait()` or were suspended past their deadline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use super::registry::CorrelationRegistry;
use crate::service::worker::{BackgroundRunnable, BackgroundWorker};

/// On-demand sweeper request.
#[derive(Debug)]
pub enum SweepTask {
    SweepNow,
}

pub struct DeadlineSweeper {
    registry: Arc<CorrelationRegistry>,
    expired_total: u64,
}

impl DeadlineSweeper {
    #[must_use]
    pub fn new(registry: Arc<CorrelationRegistry>) -> Self {
        Self {
            registry,
            expired_total: 0,
        }
    }

    /// Spawns the sweeper on a [`BackgroundWorker`] ticking every `interval`.
    #[must_use]
    pub fn spawn(registry: Arc<CorrelationRegistry>, interval: Duration) -> BackgroundWorker<Self> {
        BackgroundWorker::start("deadline-sweeper", Self::new(registry), interval)
    }

    fn sweep(&mut self) {
        let expired = self.registry.expire_overdue(Instant::now());
        if expired > 0 {
            self.expired_total += expired as u64;
            debug!(expired, pending = self.registry.len(), "swept overdue calls");
        }
    }
}

#[async_trait]
impl BackgroundRunnable for DeadlineSweeper {
    type Task = SweepTask;

    async fn run(&mut self, task: SweepTask) {
        match task {
            SweepTask::SweepNow => self.sweep(),
        }
    }

    async fn on_tick(&mut self) {
        self.sweep();
    }

    async fn shutdown(&mut self) {
        debug!(expired_total = self.expired_total, "deadline sweeper shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::registry::Terminal;

    #[tokio::test]
    async fn sweep_now_expires_overdue_entries() {
        let registry = Arc::new(CorrelationRegistry::new());
        let handle = registry
            .register("overdue".into(), Instant::now())
            .unwrap();
        let _fresh = registry
            .register("fresh".into(), Instant::now() + Duration::from_secs(60))
            .unwrap();

        let mut worker = DeadlineSweeper::spawn(Arc::clone(&registry), Duration::from_secs(60));
        worker.submit(SweepTask::SweepNow).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!registry.contains(&"overdue".into()));
        assert!(registry.contains(&"fresh".into()));
        assert_eq!(handle.wait().await, Terminal::TimedOut);
        worker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn tick_expires_without_caller_involvement() {
        let registry = Arc::new(CorrelationRegistry::new());
        let handle = registry
            .register("idle".into(), Instant::now() + Duration::from_millis(30))
            .unwrap();

        let mut worker = DeadlineSweeper::spawn(Arc::clone(&registry), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(registry.is_empty());
        // The caller arrives late and still sees the expiry.
        assert_eq!(handle.wait().await, Terminal::TimedOut);
        worker.stop().await;
    }
}
