//! Wiring of the running service: event log, canonical store, dead-letter
//! log and pipelines, plus the restart replay.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tracing::{info, warn};

use leadsync_fabric::{EventFabric, SyncMode, WalConfig};
use leadsync_pipeline::{Dispatcher, DrainReport, PipelineRegistry, SyncConfig};
use leadsync_server::{AppState, ServerConfig};
use leadsync_store::{CanonicalStore, DeadLetterChannel, DeadLetterLog, InMemoryCanonicalStore};

/// Everything one configuration file holds.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub sync: SyncConfig,
    pub server: ServerConfig,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct ServerSection {
    server: ServerConfig,
}

impl ServiceConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let sync = SyncConfig::from_toml_str(s)?;
        let ServerSection { server } = toml::from_str(s).context("invalid [server] table")?;
        Ok(Self { sync, server })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }
}

/// A started service. Must be created inside a tokio runtime.
pub struct Service {
    checkpoint_on_drain: bool,
    fabric: Arc<EventFabric>,
    state: AppState,
    dispatcher: Dispatcher,
    replayed: usize,
}

impl Service {
    /// Open the event and dead-letter logs, start every pipeline, and
    /// redeliver the events still held in the event log.
    pub fn start(config: &SyncConfig) -> anyhow::Result<Self> {
        let wal_path = config.wal_path();
        let wal_config = WalConfig {
            sync_mode: if config.fsync_wal {
                SyncMode::EveryWrite
            } else {
                SyncMode::OsDefault
            },
        };
        let fabric = Arc::new(
            EventFabric::open(&wal_path, wal_config)
                .with_context(|| format!("failed to open event log {}", wal_path.display()))?,
        );

        let store: Arc<dyn CanonicalStore> =
            Arc::new(InMemoryCanonicalStore::with_node_id(config.node_id));
        let dead_letter_path = config.dead_letter_path();
        let dead_letters: Arc<dyn DeadLetterChannel> = Arc::new(
            DeadLetterLog::open(&dead_letter_path).with_context(|| {
                format!("failed to open dead-letter log {}", dead_letter_path.display())
            })?,
        );

        let registry = PipelineRegistry::from_config(config, store.clone(), dead_letters.clone())?;
        let stats = registry.stats();
        let dispatcher = registry.start(&fabric);

        let pending = fabric.recover().context("failed to read event log")?;
        for event in &pending {
            fabric.redeliver(event);
        }
        if !pending.is_empty() {
            info!(events = pending.len(), "replayed logged events");
        }

        Ok(Self {
            checkpoint_on_drain: config.checkpoint_on_drain,
            state: AppState::new(fabric.clone(), store, dead_letters, stats),
            fabric,
            dispatcher,
            replayed: pending.len(),
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Number of logged events redelivered at start.
    pub fn replayed(&self) -> usize {
        self.replayed
    }

    /// Stop accepting events, drain the pipelines, and compact the event log
    /// when configured. Unacknowledged events survive compaction.
    pub async fn drain(self) -> anyhow::Result<DrainReport> {
        self.fabric.close();
        let report = self.dispatcher.shutdown().await;
        if self.checkpoint_on_drain {
            let kept = self.fabric.checkpoint().context("failed to checkpoint event log")?;
            if kept > 0 {
                warn!(events = kept, "drain left work unfinished; kept for redelivery");
            }
        }
        Ok(report)
    }
}
