//! runseal Session
//!
//! The session owns the current [`RandomBatch`] and at most one in-flight
//! fetch for the next one. It mediates every read:
//! - Rotation of expired batches (eager refill, bounded wait, local fallback)
//! - Lifecycle bookkeeping (join / pause / unpause)
//! - Audit recording of activations and draws
//!
//! # Rotation Contract
//!
//! A replacement fetch starts as soon as a batch becomes current. While the
//! batch is inside its normal window reads never wait. Past the normal window
//! an arrived replacement is adopted without waiting; past the extra window the
//! read waits at most `fetch_timeout` (never more than [`FETCH_TIMEOUT`]) and
//! then falls back to the backup generator. No error reaches the reader: it
//! gets a value or `None`.

#![deny(unsafe_code)]

pub mod fetch;
pub mod lifecycle;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use prost::Message;
use runseal_audit::{ActivationRecord, AuditConfig, AuditRecorder, DrawRecord};
use runseal_core::{
    Authority, BackupGenerator, BatchIndex, Category, Clock, RandomBatch, RunId, SessionSeeds,
    WindowBudgets,
};
use runseal_wire::{AuditArtifact, StartRunToken};
use tracing::{debug, error, info, warn};

use fetch::{FetchOutcome, PendingFetch};
use lifecycle::{Lifecycle, LifecycleState};

pub use registry::SessionRegistry;

// ============================================================================
// Session Parameters
// ============================================================================

/// Hard upper bound on how long a read may wait for a fetch.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(1);

/// Time after join during which the session may still be paused.
pub const GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub budgets: WindowBudgets,
    /// Clamped to [`FETCH_TIMEOUT`].
    pub fetch_timeout: Duration,
    pub grace_period: Duration,
    pub record_draws: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            budgets: WindowBudgets::default(),
            fetch_timeout: FETCH_TIMEOUT,
            grace_period: GRACE_PERIOD,
            record_draws: true,
        }
    }
}

// ============================================================================
// End Reason & Errors
// ============================================================================

/// Reason for session termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Complete,
    Abandoned,
    /// Superseded by a newly started session.
    Replaced,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Abandoned => "abandoned",
            Self::Replaced => "replaced",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("malformed start token: {0}")]
    MalformedStartToken(#[from] prost::DecodeError),
}

// ============================================================================
// Session
// ============================================================================

/// One verifiable run.
pub struct Session {
    run_id: RunId,
    config: SessionConfig,
    authority: Arc<dyn Authority>,
    clock: Arc<dyn Clock>,
    created_at: Instant,
    lifecycle: Lifecycle,
    /// Index the next activated batch receives.
    rotation_counter: BatchIndex,
    fetches_issued: u64,
    current: Option<RandomBatch>,
    pending: Option<PendingFetch>,
    backup: Option<BackupGenerator>,
    audit: AuditRecorder,
}

impl Session {
    /// Start a fresh session.
    ///
    /// The session seed chain yields the initial batch (activated at index 0)
    /// and then the backup generator. The first fetch starts immediately.
    pub fn new(
        run_id: RunId,
        seed: u64,
        authority: Arc<dyn Authority>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        let seeds = SessionSeeds::derive(seed);
        let mut session = Self::bare(run_id, Some(seed), authority, clock, config);
        session.backup = Some(BackupGenerator::new(seeds.backup));
        session.install(RandomBatch::from_seed(seeds.initial_batch));
        session.start_fetch();
        info!(run_id, "session started");
        session
    }

    /// Start a fresh session from an authority-issued start token.
    pub fn from_start_token(
        token: &[u8],
        authority: Arc<dyn Authority>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let token = StartRunToken::decode(token)?;
        Ok(Self::new(token.run_id, token.seed, authority, clock, config))
    }

    /// Re-enter a known run by id.
    ///
    /// There is no current batch and no backup generator; the first read
    /// resolves the fetch started here. Until a fetch succeeds reads return
    /// `None`.
    pub fn reattach(
        run_id: RunId,
        authority: Arc<dyn Authority>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        let mut session = Self::bare(run_id, None, authority, clock, config);
        session.start_fetch();
        info!(run_id, "session reattached");
        session
    }

    fn bare(
        run_id: RunId,
        seed: Option<u64>,
        authority: Arc<dyn Authority>,
        clock: Arc<dyn Clock>,
        mut config: SessionConfig,
    ) -> Self {
        config.fetch_timeout = config.fetch_timeout.min(FETCH_TIMEOUT);
        let audit = AuditRecorder::new(AuditConfig {
            run_id,
            session_seed: seed,
            record_draws: config.record_draws,
        });
        Self {
            run_id,
            lifecycle: Lifecycle::new(config.grace_period),
            created_at: clock.now(),
            config,
            authority,
            clock,
            rotation_counter: 0,
            fetches_issued: 0,
            current: None,
            pending: None,
            backup: None,
            audit,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of batches activated so far.
    pub fn rotation_counter(&self) -> BatchIndex {
        self.rotation_counter
    }

    pub fn has_pending_fetch(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether the pending fetch has already produced its result.
    pub fn fetch_ready(&self) -> bool {
        self.pending.as_ref().is_some_and(PendingFetch::is_finished)
    }

    pub fn has_backup(&self) -> bool {
        self.backup.is_some()
    }

    /// Current batch without triggering rotation.
    pub fn peek_current_batch(&self) -> Option<&RandomBatch> {
        self.current.as_ref()
    }

    /// Current batch, rotated first if due.
    ///
    /// Values taken from the returned batch (through `extract_value` or
    /// `generator`) bypass the audit trail. Use [`Session::current_value`] for
    /// draws that must appear in the artifact.
    pub fn current_batch(&mut self) -> Option<&RandomBatch> {
        self.current_batch_by(self.read_deadline())
    }

    /// Like [`Session::current_batch`], but any wait for a fetch ends at
    /// `deadline` (wall time).
    pub fn current_batch_by(&mut self, deadline: Instant) -> Option<&RandomBatch> {
        self.update(deadline);
        self.current.as_ref()
    }

    /// Value for `(category, sub_key)` from the current batch, rotated first if
    /// due. `None` only when no batch could be obtained at all. The draw is
    /// recorded in the audit trail.
    pub fn current_value(&mut self, category: Category, sub_key: Option<&str>) -> Option<u64> {
        self.current_value_by(category, sub_key, self.read_deadline())
    }

    /// Like [`Session::current_value`], but any wait for a fetch ends at
    /// `deadline` (wall time). Callers that queue for the session before
    /// reading pass the deadline taken when they arrived.
    pub fn current_value_by(
        &mut self,
        category: Category,
        sub_key: Option<&str>,
        deadline: Instant,
    ) -> Option<u64> {
        self.update(deadline);
        let batch = self.current.as_ref()?;
        let batch_index = batch.activation_index()?;
        let value = batch.extract_value(category, sub_key);
        self.audit.record_draw(DrawRecord {
            batch_index,
            category,
            sub_key: sub_key.map(str::to_string),
            value,
        });
        Some(value)
    }

    // ------------------------------------------------------------------------
    // Lifecycle signals
    // ------------------------------------------------------------------------

    pub fn join(&mut self) {
        if self.lifecycle.join(self.clock.now()) {
            info!(run_id = self.run_id, "joined world");
        }
    }

    /// Try to pause. Returns whether the session is paused afterwards.
    pub fn pause(&mut self) -> bool {
        let before = self.lifecycle.last_state();
        let paused = self.lifecycle.pause(self.clock.now());
        let after = self.lifecycle.last_state();
        if before != after {
            info!(
                run_id = self.run_id,
                from = before.as_str(),
                to = after.as_str(),
                "lifecycle transition"
            );
        }
        paused
    }

    pub fn unpause(&mut self) {
        if self.lifecycle.unpause() {
            info!(run_id = self.run_id, "unpaused");
        }
    }

    pub fn lifecycle_state(&mut self) -> LifecycleState {
        self.lifecycle.state(self.clock.now())
    }

    pub fn is_paused(&self) -> bool {
        self.lifecycle.last_state() == LifecycleState::Paused
    }

    pub fn in_startup(&mut self) -> bool {
        self.lifecycle_state() == LifecycleState::Startup
    }

    /// End the session and seal its audit trail. A pending fetch is abandoned.
    pub fn finalize(self, reason: EndReason) -> AuditArtifact {
        info!(
            run_id = self.run_id,
            reason = reason.as_str(),
            batches = self.rotation_counter,
            "session ended"
        );
        self.audit.finalize(reason.as_str())
    }

    // ------------------------------------------------------------------------
    // Rotation
    // ------------------------------------------------------------------------

    fn read_deadline(&self) -> Instant {
        Instant::now() + self.config.fetch_timeout
    }

    /// Rotate the current batch if due.
    fn update(&mut self, deadline: Instant) {
        let now = self.clock.now();
        let Some(batch) = &self.current else {
            self.ensure_fetch();
            self.resolve(deadline);
            return;
        };

        let budgets = &self.config.budgets;
        let fresh = batch.is_within_normal_window(now, budgets);
        let within_extra = batch.is_within_extra_window(now, budgets);
        let index = batch.activation_index();

        if fresh && self.pending.is_some() {
            return;
        }
        self.ensure_fetch();
        if fresh {
            return;
        }

        if within_extra {
            // Out of normal time: adopt the replacement only if it already arrived.
            if let Some(outcome) = self.take_finished_fetch() {
                debug!(run_id = self.run_id, ?index, "replacement ready, rotating");
                self.complete_rotation(outcome);
            }
            return;
        }

        debug!(run_id = self.run_id, ?index, "batch out of extra time, rotating");
        self.resolve(deadline);
    }

    fn ensure_fetch(&mut self) {
        if self.pending.is_none() {
            self.start_fetch();
        }
    }

    fn start_fetch(&mut self) {
        debug_assert!(self.pending.is_none(), "fetch already in flight");
        let generation = self.fetches_issued;
        self.fetches_issued += 1;
        self.pending = Some(PendingFetch::spawn(
            Arc::clone(&self.authority),
            self.run_id,
            generation,
        ));
    }

    fn take_finished_fetch(&mut self) -> Option<FetchOutcome> {
        let outcome = self.pending.as_ref()?.poll()?;
        self.pending = None;
        Some(outcome)
    }

    /// Wait for the pending fetch until `deadline` (never longer than
    /// `fetch_timeout`) and rotate with its outcome.
    fn resolve(&mut self, deadline: Instant) {
        let timeout = deadline
            .saturating_duration_since(Instant::now())
            .min(self.config.fetch_timeout);
        let outcome = match self.pending.take() {
            Some(fetch) => fetch.wait(timeout),
            None => FetchOutcome::Lost,
        };
        self.complete_rotation(outcome);
    }

    /// Activate the fetched batch or a fallback, then start the next fetch.
    fn complete_rotation(&mut self, outcome: FetchOutcome) {
        let replacement = match outcome {
            FetchOutcome::Ready(batch) => Some(batch),
            other => {
                warn!(
                    run_id = self.run_id,
                    outcome = other.as_str(),
                    "fetch did not deliver a batch"
                );
                self.fallback_batch()
            }
        };

        match replacement {
            Some(batch) => self.install(batch),
            None => error!(
                run_id = self.run_id,
                "no batch available and no backup generator; retrying on next read"
            ),
        }

        self.start_fetch();
    }

    fn fallback_batch(&mut self) -> Option<RandomBatch> {
        let backup = self.backup.as_mut()?;
        let batch = RandomBatch::from_backup(backup);
        warn!(
            run_id = self.run_id,
            backup_draws = backup.draws(),
            "using batch from backup generator"
        );
        Some(batch)
    }

    fn install(&mut self, mut batch: RandomBatch) {
        let now = self.clock.now();
        let index = self.rotation_counter;
        batch.activate(index, now);
        self.rotation_counter += 1;

        self.audit.record_activation(ActivationRecord {
            index,
            seed: batch.seed(),
            source: batch.source(),
            elapsed_ms: now.saturating_duration_since(self.created_at).as_millis() as u64,
        });

        if batch.is_degraded() {
            warn!(run_id = self.run_id, index, "activated degraded batch");
        } else {
            info!(
                run_id = self.run_id,
                index,
                source = batch.source().as_str(),
                "activated batch"
            );
        }
        self.current = Some(batch);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("run_id", &self.run_id)
            .field("lifecycle", &self.lifecycle)
            .field("rotation_counter", &self.rotation_counter)
            .field("current", &self.current)
            .field("pending", &self.pending.as_ref().map(PendingFetch::generation))
            .field("backup", &self.backup)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
