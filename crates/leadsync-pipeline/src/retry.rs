use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use leadsync_store::{DeadLetterChannel, WriteError};
use leadsync_types::{CanonicalId, CanonicalLead, DeadLetterEntry, LeadCandidate};

use crate::error::{PipelineError, PipelineResult};
use crate::writer::UpsertWriter;

/// Bounds and pacing of write retries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total write attempts before a transient failure is dead-lettered.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay_ms: u64,
    /// Upper bound on the un-jittered delay.
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Uniform jitter as a fraction of the delay (`0.2` = ±20%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after `failed_attempt` (1-based), without jitter:
    /// `min(max_delay, base_delay * multiplier^(failed_attempt - 1))`.
    pub fn nominal_delay(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(63) as i32;
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(raw.min(self.max_delay_ms as f64) as u64)
    }

    /// Nominal delay with uniform jitter applied.
    pub fn backoff_delay<R: Rng + ?Sized>(&self, failed_attempt: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal_delay(failed_attempt).as_millis() as f64;
        let factor = if self.jitter > 0.0 {
            rng.gen_range((1.0 - self.jitter)..=(1.0 + self.jitter))
        } else {
            1.0
        };
        Duration::from_millis((nominal * factor).round().max(0.0) as u64)
    }

    /// Delay to wait after `error` ended attempt `failed_attempt`.
    /// A rate-limit hint is honoured as a lower bound.
    pub fn delay_after(&self, error: &WriteError, failed_attempt: u32) -> Duration {
        let computed = self.backoff_delay(failed_attempt, &mut rand::thread_rng());
        match error.retry_after() {
            Some(hint) => hint.max(computed),
            None => computed,
        }
    }
}

/// State of a [`SyncAttempt`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Pending,
    InFlight,
    Success,
    RetryableFailure,
    FatalFailure,
    DeadLetter,
}

impl AttemptState {
    /// Whether the state machine allows `self -> next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use AttemptState::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (InFlight, Success)
                | (InFlight, RetryableFailure)
                | (InFlight, FatalFailure)
                | (RetryableFailure, Pending)
                | (RetryableFailure, DeadLetter)
                | (FatalFailure, DeadLetter)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::DeadLetter)
    }
}

/// In-flight retry bookkeeping for one sync goal.
///
/// Lives only while the controller drives a candidate; it is dropped on
/// success or once the goal has been dead-lettered.
#[derive(Clone, Debug)]
pub struct SyncAttempt {
    pub canonical_id: CanonicalId,
    /// Number of the current (or last) physical write attempt, 1-based.
    pub attempt_number: u32,
    pub last_error: Option<WriteError>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub state: AttemptState,
}

impl SyncAttempt {
    pub fn new(canonical_id: CanonicalId) -> Self {
        Self {
            canonical_id,
            attempt_number: 0,
            last_error: None,
            next_retry_at: None,
            state: AttemptState::Pending,
        }
    }

    pub fn transition(&mut self, next: AttemptState) -> PipelineResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// `Pending -> InFlight`, starting the next physical attempt.
    pub fn begin(&mut self) -> PipelineResult<u32> {
        self.transition(AttemptState::InFlight)?;
        self.attempt_number += 1;
        self.next_retry_at = None;
        Ok(self.attempt_number)
    }

    /// Record a failed write and move to the matching failure state.
    pub fn fail(&mut self, error: WriteError) -> PipelineResult<()> {
        let next = if error.is_retryable() {
            AttemptState::RetryableFailure
        } else {
            AttemptState::FatalFailure
        };
        self.transition(next)?;
        self.last_error = Some(error);
        Ok(())
    }
}

/// Final result of driving one candidate.
#[derive(Clone, Debug)]
pub enum SyncOutcome {
    /// The candidate is committed.
    Synced { lead: CanonicalLead, attempts: u32 },
    /// The goal failed for good and was recorded on the dead-letter channel.
    /// `persisted` is `false` if appending the entry itself failed.
    DeadLettered {
        entry: DeadLetterEntry,
        persisted: bool,
    },
    /// Shutdown arrived before the next retry could be scheduled.
    Abandoned { attempts: u32, last_error: WriteError },
}

impl SyncOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Synced { attempts, .. } | Self::Abandoned { attempts, .. } => *attempts,
            Self::DeadLettered { entry, .. } => entry.attempts,
        }
    }
}

/// Drives a candidate through write attempts until it is synced,
/// dead-lettered, or abandoned at shutdown.
///
/// Transient failures are retried with exponential backoff up to
/// `max_attempts`; permanent failures are dead-lettered immediately. Either
/// way the delivery is acknowledged; nothing is re-raised to the adapter.
#[derive(Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    writer: UpsertWriter,
    dead_letters: Arc<dyn DeadLetterChannel>,
    shutdown: watch::Receiver<bool>,
}

impl RetryController {
    pub fn new(
        policy: RetryPolicy,
        writer: UpsertWriter,
        dead_letters: Arc<dyn DeadLetterChannel>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            policy,
            writer,
            dead_letters,
            shutdown,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn drive(&self, candidate: &LeadCandidate) -> PipelineResult<SyncOutcome> {
        let mut attempt = SyncAttempt::new(candidate.canonical_id);
        let mut shutdown = self.shutdown.clone();

        loop {
            let number = attempt.begin()?;
            let error = match self.writer.upsert(candidate, number).await {
                Ok(lead) => {
                    attempt.transition(AttemptState::Success)?;
                    if number > 1 {
                        info!(
                            source = %candidate.source_database,
                            canonical_id = %candidate.canonical_id.short_hex(),
                            attempts = number,
                            "synced after retry"
                        );
                    }
                    return Ok(SyncOutcome::Synced {
                        lead,
                        attempts: number,
                    });
                }
                Err(error) => error,
            };

            attempt.fail(error.clone())?;

            if attempt.state == AttemptState::FatalFailure {
                attempt.transition(AttemptState::DeadLetter)?;
                return Ok(self.dead_letter(candidate, &error, number).await);
            }

            if number >= self.policy.max_attempts {
                attempt.transition(AttemptState::DeadLetter)?;
                return Ok(self.dead_letter(candidate, &error, number).await);
            }

            if *shutdown.borrow() {
                return Ok(self.abandon(candidate, error, number));
            }

            let delay = self.policy.delay_after(&error, number);
            attempt.next_retry_at = chrono::Duration::from_std(delay)
                .ok()
                .map(|d| Utc::now() + d);
            warn!(
                source = %candidate.source_database,
                canonical_id = %candidate.canonical_id.short_hex(),
                attempt = number,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient write failure; retry scheduled"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_requested(&mut shutdown) => {
                    return Ok(self.abandon(candidate, error, number));
                }
            }

            attempt.transition(AttemptState::Pending)?;
        }
    }

    async fn dead_letter(
        &self,
        candidate: &LeadCandidate,
        error: &WriteError,
        attempts: u32,
    ) -> SyncOutcome {
        let entry = DeadLetterEntry::new(candidate, error.to_string(), attempts);
        let persisted = match self.dead_letters.append(&entry).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    source = %candidate.source_database,
                    original_id = %candidate.original_id,
                    error = %e,
                    "failed to persist dead-letter entry"
                );
                false
            }
        };
        warn!(
            source = %candidate.source_database,
            original_id = %candidate.original_id,
            attempts,
            error = %error,
            "sync dead-lettered"
        );
        SyncOutcome::DeadLettered { entry, persisted }
    }

    fn abandon(&self, candidate: &LeadCandidate, last_error: WriteError, attempts: u32) -> SyncOutcome {
        debug!(
            source = %candidate.source_database,
            canonical_id = %candidate.canonical_id.short_hex(),
            attempts,
            "shutdown requested; retry not scheduled"
        );
        SyncOutcome::Abandoned {
            attempts,
            last_error,
        }
    }
}

/// Resolves once shutdown has been requested. Pends forever if the
/// shutdown sender is gone, since no request can arrive any more.
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

impl std::fmt::Debug for RetryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController")
            .field("policy", &self.policy)
            .field("writer", &self.writer)
            .finish()
    }
}
