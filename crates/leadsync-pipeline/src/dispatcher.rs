use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use leadsync_fabric::{Acknowledger, EventFabric, EventFilter, EventStream, SourceEvent};
use leadsync_store::{CanonicalStore, DeadLetterChannel};
use leadsync_types::SourceId;

use crate::adapter::SourceAdapter;
use crate::config::SyncConfig;
use crate::error::PipelineResult;
use crate::pipeline::{PipelineOutcome, SourcePipeline};
use crate::retry::{shutdown_requested, RetryController};
use crate::stats::{SourceStats, StatsSnapshot};
use crate::writer::UpsertWriter;

/// Every configured pipeline, keyed by source.
///
/// Built once from configuration; adding a source is a configuration change
/// only. All pipelines share one canonical store, one dead-letter channel
/// and one shutdown signal.
pub struct PipelineRegistry {
    pipelines: BTreeMap<SourceId, SourcePipeline>,
    max_in_flight: usize,
    shutdown: watch::Sender<bool>,
}

impl PipelineRegistry {
    pub fn from_config(
        config: &SyncConfig,
        store: Arc<dyn CanonicalStore>,
        dead_letters: Arc<dyn DeadLetterChannel>,
    ) -> PipelineResult<Self> {
        config.validate()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let writer = UpsertWriter::new(store, config.write_timeout());

        let pipelines = config
            .sources
            .iter()
            .map(|source| {
                let adapter = SourceAdapter::new(source.id.clone(), source.normalization.clone());
                let controller = RetryController::new(
                    config.retry.clone(),
                    writer.clone(),
                    dead_letters.clone(),
                    shutdown_rx.clone(),
                );
                (source.id.clone(), SourcePipeline::new(adapter, controller))
            })
            .collect::<BTreeMap<_, _>>();

        info!(
            sources = pipelines.len(),
            max_in_flight = config.max_in_flight,
            max_attempts = config.retry.max_attempts,
            "pipeline registry built"
        );

        Ok(Self {
            pipelines,
            max_in_flight: config.max_in_flight,
            shutdown,
        })
    }

    pub fn get(&self, source: &SourceId) -> Option<&SourcePipeline> {
        self.pipelines.get(source)
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceId> {
        self.pipelines.keys()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats::new(
            self.pipelines
                .iter()
                .map(|(id, p)| (id.clone(), p.stats().clone()))
                .collect(),
        )
    }

    /// Subscribe every pipeline to its source and start one task per source.
    ///
    /// Each delivery that reaches a final outcome is acknowledged to the
    /// fabric, so it is not recovered again after a restart.
    pub fn start(self, fabric: &EventFabric) -> Dispatcher {
        let stats = self.stats();
        let acks = fabric.acknowledger();
        let workers = self
            .pipelines
            .into_iter()
            .map(|(source, pipeline)| {
                let events = fabric.subscribe(EventFilter::source(source.clone()));
                let handle = tokio::spawn(run_source(
                    pipeline,
                    events,
                    acks.clone(),
                    self.max_in_flight,
                    self.shutdown.subscribe(),
                ));
                debug!(source = %source, "source worker started");
                (source, handle)
            })
            .collect();

        info!("dispatcher started");
        Dispatcher {
            shutdown: self.shutdown,
            workers,
            stats,
        }
    }
}

impl std::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("sources", &self.pipelines.keys().collect::<Vec<_>>())
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}

/// Drives one source's event stream. Returns the number of queued events
/// left undelivered at shutdown.
async fn run_source(
    pipeline: SourcePipeline,
    mut events: EventStream,
    acks: Acknowledger,
    max_in_flight: usize,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let source = pipeline.source().clone();
    let mut in_flight: JoinSet<PipelineOutcome> = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                settle(&pipeline, joined);
            }
            event = events.recv(), if in_flight.len() < max_in_flight => match event {
                Some(event) => {
                    let pipeline = pipeline.clone();
                    let acks = acks.clone();
                    in_flight.spawn(async move {
                        let outcome = pipeline.process(&event).await;
                        if outcome.is_final() {
                            acknowledge(acks, &event).await;
                        }
                        outcome
                    });
                }
                None => {
                    debug!(source = %source, "event stream closed");
                    break;
                }
            },
        }
    }

    // In-flight writes run to completion; pending retries see the shutdown
    // signal and give up.
    while let Some(joined) = in_flight.join_next().await {
        settle(&pipeline, joined);
    }

    events.close();
    let mut undelivered = 0;
    while events.try_recv().is_ok() {
        undelivered += 1;
    }
    if undelivered > 0 {
        warn!(source = %source, undelivered, "events left queued at shutdown");
    }
    undelivered
}

async fn acknowledge(acks: Acknowledger, event: &SourceEvent) {
    let sequence = event.sequence;
    let acked = match tokio::task::spawn_blocking(move || acks.ack(sequence)).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    if let Err(error) = acked {
        warn!(
            source = %event.source,
            sequence,
            error = %error,
            "event not acknowledged; it will be redelivered after restart"
        );
    }
}

fn settle(pipeline: &SourcePipeline, joined: Result<PipelineOutcome, JoinError>) {
    if let Err(e) = joined {
        error!(source = %pipeline.source(), error = %e, "sync task panicked");
        pipeline.stats().record_failed();
    }
}

/// Handle to the running pipelines.
pub struct Dispatcher {
    shutdown: watch::Sender<bool>,
    workers: Vec<(SourceId, JoinHandle<usize>)>,
    stats: SourceStats,
}

impl Dispatcher {
    pub fn stats(&self) -> SourceStats {
        self.stats.clone()
    }

    /// Stop taking new events, let in-flight writes finish, and cancel
    /// pending retries.
    pub async fn shutdown(self) -> DrainReport {
        info!("dispatcher draining");
        self.shutdown.send_replace(true);

        let mut sources = Vec::with_capacity(self.workers.len());
        for (source, handle) in self.workers {
            let undelivered = match handle.await {
                Ok(n) => n,
                Err(e) => {
                    error!(source = %source, error = %e, "source worker failed");
                    0
                }
            };
            let stats = self.stats.get(&source).unwrap_or_default();
            sources.push(SourceDrain {
                source,
                stats,
                undelivered,
            });
        }

        let report = DrainReport { sources };
        let total = report.total();
        info!(
            synced = total.synced,
            dead_lettered = total.dead_lettered,
            abandoned = total.abandoned,
            undelivered = report.undelivered(),
            "dispatcher drained"
        );
        report
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers.len())
            .finish()
    }
}

/// Final counters of one source after drain.
#[derive(Clone, Debug, Serialize)]
pub struct SourceDrain {
    pub source: SourceId,
    pub stats: StatsSnapshot,
    /// Events queued for this source that were never started.
    pub undelivered: usize,
}

/// Outcome of [`Dispatcher::shutdown`].
#[derive(Clone, Debug, Serialize)]
pub struct DrainReport {
    pub sources: Vec<SourceDrain>,
}

impl DrainReport {
    pub fn total(&self) -> StatsSnapshot {
        self.sources.iter().map(|s| s.stats).sum()
    }

    pub fn undelivered(&self) -> usize {
        self.sources.iter().map(|s| s.undelivered).sum()
    }

    /// Every received event reached a final outcome and nothing is waiting
    /// for redelivery.
    pub fn is_clean(&self) -> bool {
        let total = self.total();
        self.undelivered() == 0 && total.abandoned == 0 && total.failed == 0
    }
}
