//! Session seed chain and the local backup generator.
//!
//! The session seed drives one ChaCha20 stream. Its first output seeds the
//! initial batch and its second seeds the [`BackupGenerator`]. Verification
//! tools replay this exact order, so it MUST NOT change.

use std::fmt;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Seeds derived from a session seed, in draw order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSeeds {
    pub initial_batch: u64,
    pub backup: u64,
}

impl SessionSeeds {
    pub fn derive(session_seed: u64) -> Self {
        let mut chain = ChaCha20Rng::seed_from_u64(session_seed);
        let initial_batch = chain.next_u64();
        let backup = chain.next_u64();
        Self {
            initial_batch,
            backup,
        }
    }
}

/// Deterministic seed stream used when the authority cannot deliver in time.
///
/// Consumed strictly in call order; each call hands out the seed of one
/// fallback batch.
pub struct BackupGenerator {
    rng: ChaCha20Rng,
    draws: u64,
}

impl BackupGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
            draws: 0,
        }
    }

    pub fn next_seed(&mut self) -> u64 {
        self.draws += 1;
        self.rng.next_u64()
    }

    /// Number of seeds handed out so far.
    pub fn draws(&self) -> u64 {
        self.draws
    }
}

impl fmt::Debug for BackupGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Stream state stays out of logs.
        f.debug_struct("BackupGenerator")
            .field("draws", &self.draws)
            .finish_non_exhaustive()
    }
}
