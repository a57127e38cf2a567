//! Source synchronization pipelines for LeadSync.
//!
//! Every configured source gets one pipeline:
//!
//! ```text
//! SourceEvent -> SourceAdapter -> tag() -> RetryController(UpsertWriter) -> CanonicalStore
//!                     |                            |
//!                  dropped                    DeadLetterChannel
//! ```
//!
//! The [`PipelineRegistry`] builds all pipelines from [`SyncConfig`] once at
//! startup; [`PipelineRegistry::start`] runs each of them in its own task as
//! an independent failure domain, and [`Dispatcher::shutdown`] drains them.

pub mod adapter;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod pipeline;
pub mod retry;
pub mod stats;
pub mod tagger;
pub mod writer;

#[cfg(test)]
mod test_support;

pub use adapter::{NormalizationRule, SourceAdapter};
pub use config::{SourceConfig, SyncConfig};
pub use dispatcher::{Dispatcher, DrainReport, PipelineRegistry, SourceDrain};
pub use error::{AdapterError, PipelineError, PipelineResult};
pub use pipeline::{PipelineOutcome, SourcePipeline};
pub use retry::{AttemptState, RetryController, RetryPolicy, SyncAttempt, SyncOutcome};
pub use stats::{PipelineStats, SourceStats, StatsSnapshot};
pub use tagger::tag;
pub use writer::UpsertWriter;
