//! Source event fabric for LeadSync.
//!
//! Models the host event layer that source stores publish into. Every
//! published event is appended to a CRC-framed Write-Ahead Log before it is
//! routed, so a crash between publish and processing results in redelivery
//! on restart rather than loss (at-least-once delivery). Consumers
//! acknowledge events that reached a final outcome; acknowledged events are
//! never recovered again and are dropped when the log is compacted.

pub mod error;
pub mod event;
pub mod fabric;
pub mod wal;

pub use error::{FabricError, Result};
pub use event::{EventId, EventKind, SourceEvent};
pub use fabric::{Acknowledger, EventFabric, EventFilter, EventStream};
pub use wal::{SyncMode, WalConfig, WriteAheadLog};
