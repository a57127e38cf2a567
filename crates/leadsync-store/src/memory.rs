use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use leadsync_types::{CanonicalId, CanonicalLead, LeadCandidate};
use tracing::debug;

use crate::clock::HybridLogicalClock;
use crate::error::{StoreResult, WriteError};
use crate::traits::CanonicalStore;

/// In-memory, HashMap-based canonical store.
///
/// Each upsert takes the write lock, stamps `synced_at` from the store's
/// clock and replaces the whole document, so commits to the same id are
/// totally ordered and the last one wins.
pub struct InMemoryCanonicalStore {
    leads: RwLock<HashMap<CanonicalId, CanonicalLead>>,
    clock: HybridLogicalClock,
}

impl InMemoryCanonicalStore {
    /// Create an empty store whose commit clock uses node id 0.
    pub fn new() -> Self {
        Self::with_node_id(0)
    }

    pub fn with_node_id(node_id: u16) -> Self {
        Self {
            leads: RwLock::new(HashMap::new()),
            clock: HybridLogicalClock::new(node_id),
        }
    }

    /// Synchronous snapshot of one document, for tests and embedding.
    pub fn get_sync(&self, id: &CanonicalId) -> Option<CanonicalLead> {
        self.leads.read().expect("lock poisoned").get(id).cloned()
    }

    pub fn count(&self) -> usize {
        self.leads.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

impl Default for InMemoryCanonicalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CanonicalStore for InMemoryCanonicalStore {
    async fn upsert(
        &self,
        candidate: &LeadCandidate,
        attempt: u32,
    ) -> Result<CanonicalLead, WriteError> {
        let mut map = self.leads.write().expect("lock poisoned");
        let synced_at = self.clock.now();
        let lead = CanonicalLead::from_candidate(candidate, synced_at, attempt);
        let replaced = map.insert(lead.id, lead.clone()).is_some();
        debug!(
            canonical_id = %lead.id.short_hex(),
            source = %lead.source_database,
            replaced,
            "canonical lead committed"
        );
        Ok(lead)
    }

    async fn get(&self, id: &CanonicalId) -> StoreResult<Option<CanonicalLead>> {
        Ok(self.get_sync(id))
    }

    async fn list(&self, limit: usize) -> StoreResult<Vec<CanonicalLead>> {
        let map = self.leads.read().expect("lock poisoned");
        let mut leads: Vec<CanonicalLead> = map.values().cloned().collect();
        leads.sort_by(|a, b| b.synced_at.cmp(&a.synced_at));
        leads.truncate(limit);
        Ok(leads)
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.count())
    }
}

impl std::fmt::Debug for InMemoryCanonicalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCanonicalStore")
            .field("lead_count", &self.count())
            .field("node_id", &self.clock.node_id())
            .finish()
    }
}
