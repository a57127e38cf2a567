use std::sync::Arc;
use std::time::Duration;

use leadsync_store::{CanonicalStore, WriteError};
use leadsync_types::{CanonicalLead, LeadCandidate};

/// Default per-call write deadline.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline-bounded, idempotent writer into the canonical store.
///
/// Every call re-applies the whole candidate, so delivering an unchanged
/// record again is harmless. Exceeding the deadline is reported as
/// [`WriteError::Timeout`] and left to the retry controller.
#[derive(Clone)]
pub struct UpsertWriter {
    store: Arc<dyn CanonicalStore>,
    deadline: Duration,
}

impl UpsertWriter {
    pub fn new(store: Arc<dyn CanonicalStore>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub async fn upsert(
        &self,
        candidate: &LeadCandidate,
        attempt: u32,
    ) -> Result<CanonicalLead, WriteError> {
        match tokio::time::timeout(self.deadline, self.store.upsert(candidate, attempt)).await {
            Ok(result) => result,
            Err(_) => Err(WriteError::Timeout(self.deadline)),
        }
    }
}

impl std::fmt::Debug for UpsertWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpsertWriter")
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{candidate, ScriptedStore, Step};

    #[tokio::test]
    async fn successful_write_passes_through() {
        let store = Arc::new(ScriptedStore::new());
        let writer = UpsertWriter::new(store.clone(), DEFAULT_WRITE_TIMEOUT);
        let c = candidate("sourceA", "L1");

        let lead = writer.upsert(&c, 2).await.unwrap();
        assert_eq!(lead.sync_attempt_count, 2);
        assert!(store.inner().get_sync(&c.canonical_id).is_some());
    }

    #[tokio::test]
    async fn slow_write_times_out() {
        let store = Arc::new(ScriptedStore::new());
        store.script([Step::Stall]);
        let writer = UpsertWriter::new(store.clone(), Duration::from_millis(20));
        let c = candidate("sourceA", "L1");

        let err = writer.upsert(&c, 1).await.unwrap_err();
        assert_eq!(err, WriteError::Timeout(Duration::from_millis(20)));
        assert!(store.inner().get_sync(&c.canonical_id).is_none());
    }

    #[tokio::test]
    async fn store_errors_are_returned_unchanged() {
        let store = Arc::new(ScriptedStore::new());
        store.script([Step::Fail(WriteError::Schema("phone".into()))]);
        let writer = UpsertWriter::new(store, DEFAULT_WRITE_TIMEOUT);

        let err = writer.upsert(&candidate("sourceA", "L1"), 1).await.unwrap_err();
        assert_eq!(err, WriteError::Schema("phone".into()));
    }
}
