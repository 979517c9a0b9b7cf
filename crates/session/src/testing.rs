//! Scripted authority for session tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use runseal_core::authority::encode_batch_token;
use runseal_core::{Authority, AuthorityError, RunId};

/// Seeds handed out are `ISSUED_SEED_BASE + call number` (1-based).
pub(crate) const ISSUED_SEED_BASE: u64 = 0xa000;

pub(crate) struct ScriptedAuthority {
    delay: Duration,
    failing: AtomicBool,
    calls: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedAuthority {
    fn build(delay: Duration, failing: bool) -> Arc<Self> {
        Arc::new(Self {
            delay,
            failing: AtomicBool::new(failing),
            calls: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub(crate) fn instant() -> Arc<Self> {
        Self::build(Duration::ZERO, false)
    }

    pub(crate) fn slow(delay: Duration) -> Arc<Self> {
        Self::build(delay, false)
    }

    pub(crate) fn failing() -> Arc<Self> {
        Self::build(Duration::ZERO, true)
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Authority for ScriptedAuthority {
    fn fetch_batch(&self, run_id: RunId) -> Result<Vec<u8>, AuthorityError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(AuthorityError::Unreachable("scripted failure".to_string()));
        }
        Ok(encode_batch_token(run_id, ISSUED_SEED_BASE + call))
    }
}
