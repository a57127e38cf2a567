use std::sync::Arc;

use leadsync_fabric::EventFabric;
use leadsync_pipeline::SourceStats;
use leadsync_store::{CanonicalStore, DeadLetterChannel};

use crate::auth::{AllowAllAuth, AuthProvider};

/// Shared handles every request handler works against.
#[derive(Clone)]
pub struct AppState {
    pub fabric: Arc<EventFabric>,
    pub store: Arc<dyn CanonicalStore>,
    pub dead_letters: Arc<dyn DeadLetterChannel>,
    /// Per-source counters; its key set is the set of accepted sources.
    pub stats: SourceStats,
    pub auth: Arc<dyn AuthProvider>,
    pub max_list_limit: usize,
}

impl AppState {
    pub fn new(
        fabric: Arc<EventFabric>,
        store: Arc<dyn CanonicalStore>,
        dead_letters: Arc<dyn DeadLetterChannel>,
        stats: SourceStats,
    ) -> Self {
        Self {
            fabric,
            store,
            dead_letters,
            stats,
            auth: Arc::new(AllowAllAuth),
            max_list_limit: 1000,
        }
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_max_list_limit(mut self, limit: usize) -> Self {
        self.max_list_limit = limit;
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("fabric", &self.fabric)
            .field("sources", &self.stats.sources().collect::<Vec<_>>())
            .field("max_list_limit", &self.max_list_limit)
            .finish()
    }
}
