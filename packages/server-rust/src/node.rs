//! A relay node: caller bridge and responder wired to one bus.
//!
//! Follows a deferred lifecycle:
//! 1. `new()` allocates the registry, shutdown controller, and bridge
//! 2. `start()` subscribes the reply listener and responder and spawns the
//!    deadline sweeper
//! 3. `shutdown()` drains in-flight calls, fails the rest, and stops every
//!    background loop

use std::sync::Arc;

use anyhow::Context as _;
use tracing::{info, warn};

use crate::bridge::{
    CallerBridge, CorrelationRegistry, DeadlineSweeper, FailureCause, ReplyListener,
};
use crate::bus::MessageBus;
use crate::service::worker::{BackgroundWorker, PartitionWorkers};
use crate::service::{build_dispatch_pipeline, DomainService, RelayConfig, Responder};
use crate::shutdown::{HealthState, ShutdownController};

struct Running {
    listener: PartitionWorkers,
    responder: PartitionWorkers,
    sweeper: BackgroundWorker<DeadlineSweeper>,
}

/// Summary of a completed shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every in-flight call finished before the drain timeout.
    pub drained: bool,
    /// Calls still waiting at the end of the drain, failed with `ShuttingDown`.
    pub failed_calls: usize,
}

pub struct RelayNode {
    config: Arc<RelayConfig>,
    bus: Arc<dyn MessageBus>,
    domain: Arc<dyn DomainService>,
    registry: Arc<CorrelationRegistry>,
    shutdown: Arc<ShutdownController>,
    bridge: CallerBridge,
    running: Option<Running>,
}

impl RelayNode {
    #[must_use]
    pub fn new(
        config: RelayConfig,
        bus: Arc<dyn MessageBus>,
        domain: Arc<dyn DomainService>,
    ) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(CorrelationRegistry::new());
        let shutdown = Arc::new(ShutdownController::new());
        let bridge = CallerBridge::new(
            Arc::clone(&bus),
            Arc::clone(&registry),
            Arc::clone(&shutdown),
            &config.request_topic,
            config.wire_format,
            config.default_call_timeout(),
        );

        Self {
            config,
            bus,
            domain,
            registry,
            shutdown,
            bridge,
            running: None,
        }
    }

    /// Handle for issuing calls. Usable from any task.
    #[must_use]
    pub fn bridge(&self) -> CallerBridge {
        self.bridge.clone()
    }

    #[must_use]
    pub fn registry(&self) -> Arc<CorrelationRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Request partitions whose responder loop is still consuming.
    #[must_use]
    pub fn responder_partitions(&self) -> Vec<u32> {
        self.running
            .as_ref()
            .map(|r| r.responder.running_partitions())
            .unwrap_or_default()
    }

    /// Starts the reply listener, the responder, and the deadline sweeper.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is already running or either
    /// subscription fails.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.running.is_some() {
            anyhow::bail!("relay node {} already started", self.config.node_id);
        }

        let listener = ReplyListener::new(
            Arc::clone(&self.bus),
            Arc::clone(&self.registry),
            &self.config.reply_topic,
            &self.config.caller_group,
            self.config.wire_format,
        )
        .start(self.shutdown.shutdown_receiver())
        .await
        .context("failed to start reply listener")?;

        let pipeline = build_dispatch_pipeline(Arc::clone(&self.domain), &self.config);
        let responder = Responder::new(Arc::clone(&self.bus), pipeline, Arc::clone(&self.config))
            .start(self.shutdown.shutdown_receiver())
            .await
            .context("failed to start responder")?;

        let sweeper = DeadlineSweeper::spawn(Arc::clone(&self.registry), self.config.sweep_interval());

        self.running = Some(Running {
            listener,
            responder,
            sweeper,
        });
        self.shutdown.set_ready();
        info!(node_id = %self.config.node_id, "relay node ready");
        Ok(())
    }

    /// Stops accepting calls, waits up to `drain_timeout_ms` for in-flight
    /// calls, fails whatever is still waiting, and stops every loop.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        self.shutdown.begin_draining();
        let drained = self
            .shutdown
            .wait_for_drain(self.config.drain_timeout())
            .await;
        if !drained {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "drain timed out; failing remaining calls"
            );
        }
        let failed_calls = self.registry.fail_all(&FailureCause::Shutdown);

        self.shutdown.trigger_shutdown();
        if let Some(mut running) = self.running.take() {
            running.listener.join().await;
            running.responder.join().await;
            running.sweeper.stop().await;
        }
        self.shutdown.force_stopped();

        info!(node_id = %self.config.node_id, drained, failed_calls, "relay node stopped");
        ShutdownReport {
            drained,
            failed_calls,
        }
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        self.shutdown.health_state()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
