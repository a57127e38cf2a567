//! Shared fixtures for the server tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use leadsync_fabric::EventFabric;
use leadsync_pipeline::{PipelineStats, SourceStats};
use leadsync_store::{InMemoryCanonicalStore, InMemoryDeadLetters};
use leadsync_types::SourceId;

use crate::state::AppState;

pub fn sources() -> SourceStats {
    SourceStats::new(BTreeMap::from([
        (SourceId::new("sourceA").unwrap(), Arc::new(PipelineStats::new())),
        (SourceId::new("sourceB").unwrap(), Arc::new(PipelineStats::new())),
    ]))
}

pub fn state() -> AppState {
    AppState::new(
        Arc::new(EventFabric::in_memory()),
        Arc::new(InMemoryCanonicalStore::new()),
        Arc::new(InMemoryDeadLetters::new()),
        sources(),
    )
}
