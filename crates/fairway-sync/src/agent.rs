//! # Sync Agent
//!
//! Background driver for the request queue and the sync engine.
//!
//! ## Agent Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SyncAgent Loop                                 │
//! │                                                                         │
//! │   tokio::select! {                                                      │
//! │     interval.tick()         ──► online?  drain queue, then sync_all    │
//! │     network.changed()       ──► offline → online: drain, then sync_all │
//! │     trigger_rx.recv()       ──► sync_now(): drain, then sync_all       │
//! │     shutdown_rx.recv()      ──► close feeds, exit                      │
//! │   }                                                                     │
//! │                                                                         │
//! │   Realtime (optional): one live feed per configured collection,        │
//! │   opened on start and closed on shutdown.                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::{SyncEngine, SyncStatus};
use crate::error::{SyncError, SyncResult};
use crate::network::NetworkMonitor;
use crate::request_queue::ApiClient;

/// Agent timing and feature switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentConfig {
    /// Period of the background cycle.
    pub interval: Duration,
    /// Open live feeds for every configured collection.
    pub realtime: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            interval: Duration::from_secs(30),
            realtime: false,
        }
    }
}

/// Handle to a running agent.
#[derive(Debug)]
pub struct SyncAgentHandle {
    engine: SyncEngine,
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SyncAgentHandle {
    pub async fn status(&self) -> SyncStatus {
        self.engine.status().await
    }

    /// Requests an immediate cycle. A request made while one is already
    /// queued is coalesced.
    pub fn sync_now(&self) -> SyncResult<()> {
        match self.trigger_tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SyncError::ShuttingDown),
        }
    }

    /// Stops the loop and waits for it to finish.
    pub async fn shutdown(self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Shutdown channel closed".into()))?;
        self.task
            .await
            .map_err(|e| SyncError::ChannelError(format!("Agent task failed: {e}")))
    }
}

/// Periodic and connectivity-driven sync.
pub struct SyncAgent {
    config: AgentConfig,
    engine: SyncEngine,
    api: Option<ApiClient>,
    network: watch::Receiver<bool>,
    trigger_rx: mpsc::Receiver<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl SyncAgent {
    /// Spawns the agent loop on the current runtime.
    pub fn spawn(
        config: AgentConfig,
        engine: SyncEngine,
        api: Option<ApiClient>,
        network: &NetworkMonitor,
    ) -> SyncAgentHandle {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let agent = SyncAgent {
            config,
            engine: engine.clone(),
            api,
            network: network.watch(),
            trigger_rx,
            shutdown_rx,
        };
        let task = tokio::spawn(agent.run());

        SyncAgentHandle {
            engine,
            trigger_tx,
            shutdown_tx,
            task,
        }
    }

    async fn run(mut self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            realtime = self.config.realtime,
            "Sync agent starting"
        );
        if self.config.realtime {
            self.open_feeds();
        }

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut online = *self.network.borrow_and_update();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if online {
                        self.cycle().await;
                    } else {
                        debug!("Offline, periodic sync skipped");
                    }
                }

                changed = self.network.changed() => {
                    if changed.is_err() {
                        warn!("Network monitor dropped");
                        break;
                    }
                    let now_online = *self.network.borrow_and_update();
                    if now_online && !online {
                        info!("Back online, flushing");
                        self.cycle().await;
                    }
                    online = now_online;
                }

                Some(()) = self.trigger_rx.recv() => {
                    self.cycle().await;
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Sync agent shutting down");
                    break;
                }
            }
        }

        if self.config.realtime {
            self.engine.unsubscribe_all();
        }
        info!("Sync agent stopped");
    }

    /// Drains the request queue, then runs a full sync.
    async fn cycle(&self) {
        if let Some(ref api) = self.api {
            let report = api.process_pending_queue().await;
            if report.halted {
                debug!(remaining = report.remaining, "Queue drain halted");
            }
        }
        if let Err(e) = self.engine.sync_all().await {
            error!(error = %e, "Sync cycle failed");
        }
    }

    fn open_feeds(&self) {
        for collection in &self.engine.settings().collections {
            let feed = collection.clone();
            let result = self.engine.subscribe_to_collection(collection, move |change| {
                debug!(collection = %feed, id = %change.id, kind = ?change.kind, "Realtime change");
            });
            if let Err(e) = result {
                warn!(%collection, error = %e, "Live feed unavailable");
            }
        }
    }
}
