//! HTTP server for LeadSync.
//!
//! Lets sources publish record events into the event layer and exposes
//! read-only views of the canonical store, the dead-letter channel and the
//! per-source pipeline counters.
//!
//! # Endpoints
//!
//! | Method | Path | |
//! |---|---|---|
//! | `GET` | `/v1/health` | liveness, never authenticated |
//! | `GET` | `/v1/info` | name, version, configured sources |
//! | `POST` | `/v1/sources/:source/events` | publish `{id, kind?, document}`; `202` |
//! | `GET` | `/v1/leads/:id` | one canonical lead by hex id |
//! | `GET` | `/v1/leads?limit=N` | most recently synced leads |
//! | `GET` | `/v1/dead-letters` | dead-letter entries, oldest first |
//! | `GET` | `/v1/stats` | per-source counters |

pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;
pub mod state;

#[cfg(test)]
mod test_support;

pub use auth::{Action, AllowAllAuth, AuthProvider, Credentials, Identity, StaticTokenAuth};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::SyncServer;
pub use state::AppState;
