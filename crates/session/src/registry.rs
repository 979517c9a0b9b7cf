//! Process-wide holder for the single active session.
//!
//! Every entry point locks the registry, so rotation, fetch bookkeeping and
//! lifecycle signals for the active session are serialized. At most one fetch
//! is in flight per session no matter how many threads read.
//!
//! Reads take their wait deadline before queueing on the lock, so time spent
//! behind another reader's fetch wait counts against the same
//! [`FETCH_TIMEOUT`] bound.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use runseal_core::{Authority, Category, Clock, RunId};
use runseal_wire::AuditArtifact;
use tracing::info;

use crate::lifecycle::LifecycleState;
use crate::{EndReason, FETCH_TIMEOUT, Session, SessionConfig, SessionError};

#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: Mutex<Option<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `session` as the active one.
    ///
    /// A previously active session is finalized with [`EndReason::Replaced`]
    /// and its audit artifact returned.
    pub fn start(&self, session: Session) -> Option<AuditArtifact> {
        let mut active = self.active.lock();
        let previous = active.replace(session);
        previous.map(|old| {
            info!(run_id = old.run_id(), "replacing active session");
            old.finalize(EndReason::Replaced)
        })
    }

    /// Decode a start token and install the resulting session.
    pub fn start_from_token(
        &self,
        token: &[u8],
        authority: Arc<dyn Authority>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Result<Option<AuditArtifact>, SessionError> {
        let session = Session::from_start_token(token, authority, clock, config)?;
        Ok(self.start(session))
    }

    /// End the active session. `None` if there was none.
    pub fn end(&self, reason: EndReason) -> Option<AuditArtifact> {
        let session = self.active.lock().take()?;
        Some(session.finalize(reason))
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    pub fn run_id(&self) -> Option<RunId> {
        self.active.lock().as_ref().map(Session::run_id)
    }

    /// Run `f` against the active session under the registry lock.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.active.lock().as_mut().map(f)
    }

    /// Value from the active session. `None` when no session is active or no
    /// batch could be obtained.
    pub fn current_value(&self, category: Category, sub_key: Option<&str>) -> Option<u64> {
        let deadline = Instant::now() + FETCH_TIMEOUT;
        self.with_session(|session| session.current_value_by(category, sub_key, deadline))
            .flatten()
    }

    pub fn join(&self) {
        self.with_session(Session::join);
    }

    /// Returns whether the active session is paused afterwards.
    pub fn pause(&self) -> bool {
        self.with_session(Session::pause).unwrap_or(false)
    }

    pub fn unpause(&self) {
        self.with_session(Session::unpause);
    }

    pub fn lifecycle_state(&self) -> Option<LifecycleState> {
        self.with_session(Session::lifecycle_state)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use prost::Message;
    use runseal_audit::{VerifyOptions, verify_audit};
    use runseal_core::{ManualClock, WindowBudgets};
    use runseal_wire::StartRunToken;

    use super::*;
    use crate::testing::ScriptedAuthority;

    fn session(
        run_id: RunId,
        authority: Arc<ScriptedAuthority>,
        clock: Arc<ManualClock>,
    ) -> Session {
        Session::new(run_id, 99, authority, clock, SessionConfig::default())
    }

    #[test]
    fn test_empty_registry() {
        let registry = SessionRegistry::new();
        assert!(!registry.is_active());
        assert_eq!(registry.run_id(), None);
        assert_eq!(registry.current_value(Category::WorldSeed, None), None);
        assert!(!registry.pause());
        assert_eq!(registry.lifecycle_state(), None);
        assert!(registry.end(EndReason::Complete).is_none());
    }

    #[test]
    fn test_start_and_end() {
        let registry = SessionRegistry::new();
        let clock = Arc::new(ManualClock::new());
        assert!(registry.start(session(1, ScriptedAuthority::instant(), clock)).is_none());
        assert!(registry.is_active());
        assert_eq!(registry.run_id(), Some(1));
        assert!(registry.current_value(Category::BlockDrop, Some("stone")).is_some());

        let artifact = registry.end(EndReason::Complete).unwrap();
        assert_eq!(artifact.run_id, 1);
        assert_eq!(artifact.end_reason, "complete");
        assert_eq!(artifact.draws.len(), 1);
        assert!(!registry.is_active());
    }

    #[test]
    fn test_start_replaces_previous_session() {
        let registry = SessionRegistry::new();
        let clock = Arc::new(ManualClock::new());
        registry.start(session(1, ScriptedAuthority::instant(), clock.clone()));

        let replaced = registry
            .start(session(2, ScriptedAuthority::instant(), clock))
            .unwrap();
        assert_eq!(replaced.run_id, 1);
        assert_eq!(replaced.end_reason, "replaced");
        assert!(verify_audit(&replaced, &VerifyOptions::default()).is_ok());
        assert_eq!(registry.run_id(), Some(2));
    }

    #[test]
    fn test_start_from_token() {
        let registry = SessionRegistry::new();
        let token = StartRunToken { run_id: 31, seed: 7 }.encode_to_vec();
        let previous = registry
            .start_from_token(
                &token,
                ScriptedAuthority::instant(),
                Arc::new(ManualClock::new()),
                SessionConfig::default(),
            )
            .unwrap();
        assert!(previous.is_none());
        assert_eq!(registry.run_id(), Some(31));

        let malformed = registry.start_from_token(
            &[0xff],
            ScriptedAuthority::instant(),
            Arc::new(ManualClock::new()),
            SessionConfig::default(),
        );
        assert!(malformed.is_err());
        // The active session survives a bad token.
        assert_eq!(registry.run_id(), Some(31));
    }

    #[test]
    fn test_lifecycle_through_registry() {
        let registry = SessionRegistry::new();
        let clock = Arc::new(ManualClock::new());
        registry.start(session(1, ScriptedAuthority::instant(), clock.clone()));

        assert_eq!(registry.lifecycle_state(), Some(LifecycleState::Startup));
        registry.join();
        assert!(registry.pause());
        assert_eq!(registry.lifecycle_state(), Some(LifecycleState::Paused));
        registry.unpause();
        assert_eq!(registry.lifecycle_state(), Some(LifecycleState::Running));
    }

    #[test]
    fn test_concurrent_reads_share_one_fetch() {
        let registry = Arc::new(SessionRegistry::new());
        let clock = Arc::new(ManualClock::new());
        let authority = ScriptedAuthority::slow(Duration::from_millis(20));
        registry.start(session(1, authority.clone(), clock.clone()));

        clock.advance(WindowBudgets::default().normal_plus_extra() + Duration::from_secs(1));

        let readers: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let key = format!("reader-{i}");
                    (0..25)
                        .map(|_| registry.current_value(Category::EntityDrop, Some(&key)))
                        .all(|value| value.is_some())
                })
            })
            .collect();

        for reader in readers {
            assert!(reader.join().unwrap());
        }

        // The clock stood still, so the expired batch rotated exactly once.
        let rotations = registry.with_session(|session| session.rotation_counter());
        assert_eq!(rotations, Some(2));
        assert_eq!(authority.max_in_flight(), 1);
    }

    #[test]
    fn test_queued_reader_shares_the_wait_bound() {
        let registry = Arc::new(SessionRegistry::new());
        registry.start(Session::reattach(
            1,
            ScriptedAuthority::slow(Duration::from_secs(5)),
            Arc::new(ManualClock::new()),
            SessionConfig::default(),
        ));

        let barrier = Arc::new(Barrier::new(2));
        let readers: Vec<_> = (0..2)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let started = Instant::now();
                    let value = registry.current_value(Category::WorldSeed, None);
                    (value, started.elapsed())
                })
            })
            .collect();

        for reader in readers {
            let (value, waited) = reader.join().unwrap();
            assert_eq!(value, None);
            assert!(waited < Duration::from_millis(1500), "reader stalled: {waited:?}");
        }
    }
}
