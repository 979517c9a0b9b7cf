//! Session lifecycle: STARTUP, PAUSED, RUNNING.
//!
//! Transitions:
//! - `Startup -> Paused`: pause while the grace period after join is running
//! - `Startup -> Running`: any state check once the grace period has elapsed
//! - `Paused -> Running`: explicit unpause
//!
//! `Running` is terminal. The machine only gates pause bookkeeping; batch
//! rotation runs regardless of state.

use std::time::{Duration, Instant};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// World creation; the grace period has not elapsed.
    Startup,
    /// Paused during the grace period; waiting for unpause.
    Paused,
    Running,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Paused => "paused",
            Self::Running => "running",
        }
    }
}

/// Tagged state plus the one timestamp the transitions depend on.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: LifecycleState,
    join_time: Option<Instant>,
    grace_period: Duration,
}

impl Lifecycle {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            state: LifecycleState::Startup,
            join_time: None,
            grace_period,
        }
    }

    /// Record the join time. Returns false if already joined.
    pub fn join(&mut self, now: Instant) -> bool {
        if self.join_time.is_some() {
            return false;
        }
        self.join_time = Some(now);
        true
    }

    pub fn join_time(&self) -> Option<Instant> {
        self.join_time
    }

    /// Whether the grace period after join has elapsed. False before join.
    pub fn grace_elapsed(&self, now: Instant) -> bool {
        self.join_time
            .is_some_and(|joined| now.saturating_duration_since(joined) >= self.grace_period)
    }

    /// State after applying any time-driven transition.
    pub fn state(&mut self, now: Instant) -> LifecycleState {
        self.refresh(now);
        self.state
    }

    /// State as last observed, without a time check.
    pub fn last_state(&self) -> LifecycleState {
        self.state
    }

    /// Try to pause. Returns whether the session is paused afterwards.
    pub fn pause(&mut self, now: Instant) -> bool {
        self.refresh(now);
        match self.state {
            LifecycleState::Startup if self.join_time.is_some() => {
                self.state = LifecycleState::Paused;
                true
            }
            // Not joined yet: nothing to pause.
            LifecycleState::Startup => false,
            LifecycleState::Paused => true,
            LifecycleState::Running => false,
        }
    }

    /// Leave `Paused`. Returns whether a transition happened.
    pub fn unpause(&mut self) -> bool {
        if self.state == LifecycleState::Paused {
            self.state = LifecycleState::Running;
            return true;
        }
        false
    }

    fn refresh(&mut self, now: Instant) {
        if self.state == LifecycleState::Startup && self.grace_elapsed(now) {
            self.state = LifecycleState::Running;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_secs(2);

    #[test]
    fn test_starts_in_startup() {
        let mut lifecycle = Lifecycle::new(GRACE);
        let now = Instant::now();
        assert_eq!(lifecycle.state(now), LifecycleState::Startup);
        // Without a join the grace period never starts.
        assert_eq!(
            lifecycle.state(now + Duration::from_secs(60)),
            LifecycleState::Startup
        );
    }

    #[test]
    fn test_join_is_recorded_once() {
        let mut lifecycle = Lifecycle::new(GRACE);
        let t0 = Instant::now();
        assert!(lifecycle.join(t0));
        assert!(!lifecycle.join(t0 + Duration::from_secs(1)));
        assert_eq!(lifecycle.join_time(), Some(t0));
    }

    #[test]
    fn test_pause_within_grace() {
        let mut lifecycle = Lifecycle::new(GRACE);
        let t0 = Instant::now();
        lifecycle.join(t0);
        assert!(lifecycle.pause(t0 + Duration::from_millis(1500)));
        assert_eq!(lifecycle.last_state(), LifecycleState::Paused);

        // Paused does not time out into Running.
        assert_eq!(
            lifecycle.state(t0 + Duration::from_secs(30)),
            LifecycleState::Paused
        );

        assert!(lifecycle.unpause());
        assert_eq!(lifecycle.last_state(), LifecycleState::Running);
    }

    #[test]
    fn test_pause_after_grace_runs() {
        let mut lifecycle = Lifecycle::new(GRACE);
        let t0 = Instant::now();
        lifecycle.join(t0);
        assert!(!lifecycle.pause(t0 + Duration::from_secs(3)));
        assert_eq!(lifecycle.last_state(), LifecycleState::Running);
    }

    #[test]
    fn test_grace_boundary() {
        let lifecycle = {
            let mut l = Lifecycle::new(GRACE);
            l.join(Instant::now());
            l
        };
        let joined = lifecycle.join_time().unwrap();
        assert!(!lifecycle.grace_elapsed(joined + GRACE - Duration::from_nanos(1)));
        assert!(lifecycle.grace_elapsed(joined + GRACE));
    }

    #[test]
    fn test_pause_before_join_is_refused() {
        let mut lifecycle = Lifecycle::new(GRACE);
        assert!(!lifecycle.pause(Instant::now()));
        assert_eq!(lifecycle.last_state(), LifecycleState::Startup);
    }

    #[test]
    fn test_signals_are_idempotent() {
        let mut lifecycle = Lifecycle::new(GRACE);
        let t0 = Instant::now();
        lifecycle.join(t0);
        assert!(lifecycle.pause(t0));
        assert!(lifecycle.pause(t0 + Duration::from_millis(10)));
        assert_eq!(lifecycle.last_state(), LifecycleState::Paused);

        assert!(lifecycle.unpause());
        assert!(!lifecycle.unpause());
        assert_eq!(lifecycle.last_state(), LifecycleState::Running);

        // Running is terminal.
        assert!(!lifecycle.pause(t0 + Duration::from_millis(20)));
        assert_eq!(lifecycle.last_state(), LifecycleState::Running);
    }

    #[test]
    fn test_unpause_outside_paused_is_noop() {
        let mut lifecycle = Lifecycle::new(GRACE);
        assert!(!lifecycle.unpause());
        assert_eq!(lifecycle.last_state(), LifecycleState::Startup);
    }
}
