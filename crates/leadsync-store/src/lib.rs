//! Canonical storage for LeadSync.
//!
//! This crate holds the single canonical collection that every source
//! pipeline converges on, plus the shared dead-letter channel.
//!
//! # Backends
//!
//! - [`InMemoryCanonicalStore`] -- `HashMap`-based canonical store
//! - [`InMemoryDeadLetters`] -- dead-letter channel for tests and embedding
//! - [`DeadLetterLog`] -- append-only, CRC-framed dead-letter file
//!
//! # Design Rules
//!
//! 1. Upserts are full-document replaces keyed by [`CanonicalId`], never merges.
//! 2. Each document write is atomic; concurrent writers to one id resolve by
//!    commit order (last commit wins). The store adds no other locking.
//! 3. `synced_at` is stamped by the store under the write lock, from a
//!    hybrid logical clock, so later commits always carry later timestamps.
//! 4. Dead-letter entries are append-only and never rewritten.
//!
//! [`CanonicalId`]: leadsync_types::CanonicalId

pub mod clock;
pub mod dead_letter;
pub mod error;
pub mod memory;
pub mod traits;

pub use clock::HybridLogicalClock;
pub use dead_letter::{DeadLetterLog, InMemoryDeadLetters};
pub use error::{FailureClass, StoreError, StoreResult, WriteError};
pub use memory::InMemoryCanonicalStore;
pub use traits::{CanonicalStore, DeadLetterChannel};
