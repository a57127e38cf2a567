//! Foundation types for LeadSync.
//!
//! This crate provides the identity, temporal, and record types shared by the
//! whole synchronization service. Every other LeadSync crate depends on
//! `leadsync-types`.
//!
//! # Key Types
//!
//! - [`SourceId`]: Validated name of an independently-owned source store
//! - [`OriginalId`]: Record identifier as assigned by its source
//! - [`CanonicalId`]: Deterministic BLAKE3 address derived from (source, original id)
//! - [`SyncTimestamp`]: Hybrid Logical Clock value stamped at commit time
//! - [`SyncEnvelope`]: Normalized, per-delivery view of a source record
//! - [`LeadCandidate`]: Provenance-tagged record ready to be written
//! - [`CanonicalLead`]: The document held by the canonical store
//! - [`DeadLetterEntry`]: Terminal record of a permanently failed sync

pub mod error;
pub mod identity;
pub mod record;
pub mod temporal;

pub use error::TypeError;
pub use identity::{CanonicalId, OriginalId, SourceId};
pub use record::{
    CanonicalLead, DeadLetterEntry, Document, LeadCandidate, SyncEnvelope, RESERVED_FIELDS,
};
pub use temporal::SyncTimestamp;
