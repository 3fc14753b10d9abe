// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine lifecycle.
//!
//! [`FanoutEngine`] ties the pieces together: it seeds the peer registry
//! from configuration, builds the recovery-offset matrix, spawns the
//! trysync driver, and drains everything on shutdown.
//!
//! # State Transitions
//!
//! ```text
//!            start()              shutdown()
//! Created ───────────▶ Running ──────────────▶ ShuttingDown ──▶ Stopped
//!    │                                                             ▲
//!    └────────────────────── shutdown() ───────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::binlog::BinlogManager;
use crate::config::FanoutConfig;
use crate::error::{FanoutError, Result};
use crate::metrics;
use crate::recover::RecoverOffsets;
use crate::registry::{PeerId, PeerRegistry, PeerStatus};
use crate::trysync::TrysyncDriver;

/// How long shutdown waits for each task to drain before aborting it.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// State of the fan-out engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Engine created but not started.
    Created,
    /// Driver sweeping; senders replicating.
    Running,
    /// Draining tasks after a shutdown request.
    ShuttingDown,
    /// Shut down cleanly. Safe to drop.
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Running => write!(f, "Running"),
            EngineState::ShuttingDown => write!(f, "ShuttingDown"),
            EngineState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// The replication fan-out core.
///
/// Owns the registry and the driver task; the external binlog manager is
/// shared in.
pub struct FanoutEngine<M: BinlogManager> {
    config: FanoutConfig,
    registry: Arc<PeerRegistry>,
    manager: Arc<M>,
    recover: Arc<RecoverOffsets>,
    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    driver: Option<JoinHandle<()>>,
}

impl<M: BinlogManager> FanoutEngine<M> {
    /// Create an engine. Every configured peer enters the registry with a
    /// pending handshake.
    pub fn new(config: FanoutConfig, manager: Arc<M>) -> Self {
        let registry = Arc::new(PeerRegistry::new());
        let mut peer_ids = Vec::with_capacity(config.peers.len());
        for peer in &config.peers {
            registry.insert(PeerStatus::new(peer.peer_id, &peer.ip, peer.port));
            peer_ids.push(peer.peer_id);
        }
        let recover = Arc::new(RecoverOffsets::new(&peer_ids));

        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        metrics::set_known_peers(peer_ids.len());
        metrics::set_engine_state("Created");

        Self {
            config,
            registry,
            manager,
            recover,
            state_tx,
            state_rx,
            shutdown_tx,
            shutdown_rx,
            driver: None,
        }
    }

    /// Current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// A receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// The shared peer registry (for observability and peer management).
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// The recovery-offset matrix.
    pub fn recover_offsets(&self) -> &Arc<RecoverOffsets> {
        &self.recover
    }

    /// Start the driver. Senders follow as handshakes succeed.
    pub fn start(&mut self) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(FanoutError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        info!(
            local_ip = %self.config.local_ip,
            local_port = self.config.local_port,
            peer_count = self.config.peers.len(),
            "starting fan-out engine"
        );

        let driver = TrysyncDriver::new(
            self.config.local_ip.clone(),
            self.config.local_port,
            Arc::clone(&self.registry),
            Arc::clone(&self.manager),
            Arc::clone(&self.recover),
            self.config.tunables.clone(),
            self.shutdown_rx.clone(),
        );
        self.driver = Some(tokio::spawn(driver.run()));

        let _ = self.state_tx.send(EngineState::Running);
        metrics::set_engine_state("Running");
        Ok(())
    }

    /// Shut down: signal every task, drain the driver and all senders.
    pub async fn shutdown(&mut self) {
        info!("shutting down fan-out engine");
        let _ = self.state_tx.send(EngineState::ShuttingDown);
        metrics::set_engine_state("ShuttingDown");

        let _ = self.shutdown_tx.send(true);

        if let Some(mut handle) = self.driver.take() {
            match tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "driver panicked during shutdown"),
                Err(_) => {
                    warn!("driver did not stop in time");
                    handle.abort();
                }
            }
        }

        let senders: Vec<(PeerId, JoinHandle<()>)> = {
            let mut peers = self.registry.lock();
            peers
                .iter_mut()
                .filter_map(|(id, status)| status.sender.take().map(|h| (*id, h)))
                .collect()
        };

        for (peer_id, mut handle) in senders {
            match tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(peer_id, error = %e, "sender panicked during shutdown"),
                Err(_) => {
                    warn!(peer_id, "sender did not drain in time");
                    handle.abort();
                }
            }
        }

        let _ = self.state_tx.send(EngineState::Stopped);
        metrics::set_engine_state("Stopped");
        info!("fan-out engine stopped");
    }
}
