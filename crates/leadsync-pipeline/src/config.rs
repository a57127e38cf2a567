use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use leadsync_types::SourceId;

use crate::adapter::NormalizationRule;
use crate::error::{PipelineError, PipelineResult};
use crate::retry::RetryPolicy;

/// One configured source store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: SourceId,
    #[serde(default)]
    pub normalization: NormalizationRule,
}

impl SourceConfig {
    pub fn passthrough(id: SourceId) -> Self {
        Self {
            id,
            normalization: NormalizationRule::Passthrough,
        }
    }
}

/// Service configuration, loaded once at startup.
///
/// Tables this type does not know (such as `[server]`) are ignored, so one
/// file can carry the settings of every component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Node id stamped into `synced_at` timestamps.
    pub node_id: u16,
    /// Directory holding the event WAL and the dead-letter log.
    pub data_dir: PathBuf,
    /// Per-call deadline for canonical writes.
    pub write_timeout_ms: u64,
    /// Concurrent sync goals per source.
    pub max_in_flight: usize,
    /// `fsync` the event WAL after every publish.
    pub fsync_wal: bool,
    /// Compact the event WAL on drain, dropping acknowledged events.
    pub checkpoint_on_drain: bool,
    pub retry: RetryPolicy,
    pub sources: Vec<SourceConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            data_dir: PathBuf::from("./data"),
            write_timeout_ms: 10_000,
            max_in_flight: 32,
            fsync_wal: false,
            checkpoint_on_drain: true,
            retry: RetryPolicy::default(),
            sources: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> PipelineResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| PipelineError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.sources.is_empty() {
            return Err(PipelineError::Config("at least one source must be configured".into()));
        }
        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(&source.id) {
                return Err(PipelineError::Config(format!(
                    "source {} is configured more than once",
                    source.id
                )));
            }
        }
        if self.write_timeout_ms == 0 {
            return Err(PipelineError::Config("write_timeout_ms must be positive".into()));
        }
        if self.max_in_flight == 0 {
            return Err(PipelineError::Config("max_in_flight must be positive".into()));
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(PipelineError::Config("retry.max_attempts must be at least 1".into()));
        }
        if retry.multiplier.is_nan() || retry.multiplier < 1.0 {
            return Err(PipelineError::Config("retry.multiplier must be >= 1.0".into()));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(PipelineError::Config("retry.jitter must be within [0, 1]".into()));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(PipelineError::Config(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("events.wal")
    }

    pub fn dead_letter_path(&self) -> PathBuf {
        self.data_dir.join("dead-letters.log")
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &SourceId> {
        self.sources.iter().map(|s| &s.id)
    }
}
