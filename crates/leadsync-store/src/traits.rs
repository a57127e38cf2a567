use async_trait::async_trait;
use leadsync_types::{CanonicalId, CanonicalLead, DeadLetterEntry, LeadCandidate};

use crate::error::{StoreResult, WriteError};

/// The canonical lead collection.
///
/// All implementations must satisfy these invariants:
/// - `upsert` is a full-document replace keyed by `candidate.canonical_id`.
///   Applying the same candidate N times leaves the same field state as
///   applying it once; only `synced_at` and `sync_attempt_count` may differ.
/// - Each document write is atomic. Concurrent upserts to one id are ordered
///   by the store and the last commit wins; they never fail as conflicts.
/// - `synced_at` is assigned by the store at commit time, never by callers.
#[async_trait]
pub trait CanonicalStore: Send + Sync {
    /// Write a candidate, recording `attempt` as its `sync_attempt_count`.
    ///
    /// Returns the document exactly as committed.
    async fn upsert(&self, candidate: &LeadCandidate, attempt: u32)
        -> Result<CanonicalLead, WriteError>;

    /// Read a document by canonical id. `Ok(None)` if absent.
    async fn get(&self, id: &CanonicalId) -> StoreResult<Option<CanonicalLead>>;

    /// Most recently synced documents first, at most `limit` of them.
    async fn list(&self, limit: usize) -> StoreResult<Vec<CanonicalLead>>;

    /// Number of documents in the store.
    async fn len(&self) -> StoreResult<usize>;
}

/// Append-only side channel for permanently failed sync goals.
#[async_trait]
pub trait DeadLetterChannel: Send + Sync {
    /// Append an entry. Entries are never rewritten or removed.
    async fn append(&self, entry: &DeadLetterEntry) -> StoreResult<()>;

    /// All entries, oldest first.
    async fn entries(&self) -> StoreResult<Vec<DeadLetterEntry>>;
}
