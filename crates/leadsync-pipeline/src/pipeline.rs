use std::sync::Arc;

use tracing::{debug, error, warn};

use leadsync_fabric::{EventKind, SourceEvent};
use leadsync_types::{CanonicalLead, DeadLetterEntry, SourceId};

use crate::adapter::SourceAdapter;
use crate::error::AdapterError;
use crate::retry::{RetryController, SyncOutcome};
use crate::stats::PipelineStats;
use crate::tagger::tag;

/// What happened to one delivered event.
#[derive(Clone, Debug)]
pub enum PipelineOutcome {
    /// Not a creation event; nothing to sync.
    Ignored(EventKind),
    /// The adapter rejected the record. Never retried.
    Dropped(AdapterError),
    Synced { lead: CanonicalLead, attempts: u32 },
    DeadLettered(DeadLetterEntry),
    /// Shutdown interrupted the retry schedule.
    Abandoned { attempts: u32 },
    /// Internal processing error.
    Failed(String),
}

impl PipelineOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced { .. })
    }

    /// The delivery needs no further work, now or after a restart.
    /// Abandoned and failed goals are left for redelivery.
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Abandoned { .. } | Self::Failed(_))
    }
}

/// One source's adapter -> tagger -> writer -> retry chain.
///
/// Every delivery is acknowledged: whatever happens to the record, `process`
/// reports an outcome instead of returning an error to the event layer.
#[derive(Clone, Debug)]
pub struct SourcePipeline {
    adapter: SourceAdapter,
    controller: RetryController,
    stats: Arc<PipelineStats>,
}

impl SourcePipeline {
    pub fn new(adapter: SourceAdapter, controller: RetryController) -> Self {
        Self {
            adapter,
            controller,
            stats: Arc::new(PipelineStats::new()),
        }
    }

    pub fn source(&self) -> &SourceId {
        self.adapter.source()
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub async fn process(&self, event: &SourceEvent) -> PipelineOutcome {
        self.stats.record_received();

        let envelope = match self.adapter.on_create(event) {
            Ok(envelope) => envelope,
            Err(AdapterError::UnsupportedKind(kind)) => {
                debug!(
                    source = %event.source,
                    record_id = %event.record_id,
                    kind = %kind,
                    "non-creation event skipped"
                );
                self.stats.record_ignored();
                return PipelineOutcome::Ignored(kind);
            }
            Err(e) => {
                warn!(
                    source = %event.source,
                    record_id = %event.record_id,
                    sequence = event.sequence,
                    error = %e,
                    "malformed source record dropped"
                );
                self.stats.record_dropped();
                return PipelineOutcome::Dropped(e);
            }
        };

        let candidate = tag(envelope);
        debug!(
            source = %candidate.source_database,
            original_id = %candidate.original_id,
            canonical_id = %candidate.canonical_id.short_hex(),
            "candidate tagged"
        );

        let outcome = match self.controller.drive(&candidate).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    source = %candidate.source_database,
                    original_id = %candidate.original_id,
                    error = %e,
                    "sync processing failed"
                );
                self.stats.record_failed();
                return PipelineOutcome::Failed(e.to_string());
            }
        };

        self.stats.record_retries(outcome.attempts().saturating_sub(1));
        match outcome {
            SyncOutcome::Synced { lead, attempts } => {
                self.stats.record_synced();
                PipelineOutcome::Synced { lead, attempts }
            }
            SyncOutcome::DeadLettered { entry, .. } => {
                self.stats.record_dead_lettered();
                PipelineOutcome::DeadLettered(entry)
            }
            SyncOutcome::Abandoned { attempts, .. } => {
                self.stats.record_abandoned();
                PipelineOutcome::Abandoned { attempts }
            }
        }
    }
}
