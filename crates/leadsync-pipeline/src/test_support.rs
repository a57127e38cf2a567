//! Fault-injecting store shared by the pipeline tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use leadsync_store::{CanonicalStore, InMemoryCanonicalStore, StoreResult, WriteError};
use leadsync_types::{CanonicalId, CanonicalLead, Document, LeadCandidate, OriginalId, SourceId};
use serde_json::json;

/// What the next scripted call does.
#[derive(Clone, Debug)]
pub enum Step {
    Fail(WriteError),
    /// Never completes within any reasonable deadline.
    Stall,
}

/// Wraps an in-memory store and replays scripted failures before delegating.
///
/// Global steps apply to the next calls in order; per-source behaviour
/// applies to every call for that source.
pub struct ScriptedStore {
    inner: InMemoryCanonicalStore,
    steps: Mutex<VecDeque<Step>>,
    per_source: Mutex<HashMap<SourceId, Step>>,
    calls: AtomicU32,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryCanonicalStore::new(),
            steps: Mutex::new(VecDeque::new()),
            per_source: Mutex::new(HashMap::new()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn script(&self, steps: impl IntoIterator<Item = Step>) {
        self.steps.lock().unwrap().extend(steps);
    }

    pub fn always(&self, source: &str, step: Step) {
        self.per_source
            .lock()
            .unwrap()
            .insert(SourceId::new(source).unwrap(), step);
    }

    pub fn inner(&self) -> &InMemoryCanonicalStore {
        &self.inner
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CanonicalStore for ScriptedStore {
    async fn upsert(
        &self,
        candidate: &LeadCandidate,
        attempt: u32,
    ) -> Result<CanonicalLead, WriteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .per_source
            .lock()
            .unwrap()
            .get(&candidate.source_database)
            .cloned()
            .or_else(|| self.steps.lock().unwrap().pop_front());
        match step {
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Stall) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(WriteError::Unavailable("stalled".into()))
            }
            None => self.inner.upsert(candidate, attempt).await,
        }
    }

    async fn get(&self, id: &CanonicalId) -> StoreResult<Option<CanonicalLead>> {
        self.inner.get(id).await
    }

    async fn list(&self, limit: usize) -> StoreResult<Vec<CanonicalLead>> {
        self.inner.list(limit).await
    }

    async fn len(&self) -> StoreResult<usize> {
        self.inner.len().await
    }
}

pub fn candidate(source: &str, original: &str) -> LeadCandidate {
    let source = SourceId::new(source).unwrap();
    let original = OriginalId::new(original).unwrap();
    let mut fields = Document::new();
    fields.insert("name".into(), json!("Asha"));
    fields.insert("phone".into(), json!("9999900000"));
    LeadCandidate {
        canonical_id: CanonicalId::derive(&source, &original),
        fields,
        original_id: original,
        source_database: source,
    }
}
