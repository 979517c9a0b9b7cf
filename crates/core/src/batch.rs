//! One rotation period's worth of random material.

use std::time::Instant;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::authority::{Authority, decode_batch_token};
use crate::backup::BackupGenerator;
use crate::{BatchIndex, CATEGORY_DOMAIN_TAG, Category, RunId, WindowBudgets};

/// Origin of a batch's seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchSource {
    /// First draw of the session seed chain.
    Initial,
    /// Issued by the remote authority.
    Authority,
    /// Drawn from the backup generator after a failed or late fetch.
    Backup,
}

impl BatchSource {
    /// Backup batches are functionally normal; the flag is for observability.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Backup)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Authority => "authority",
            Self::Backup => "backup",
        }
    }
}

/// Activation bookkeeping, written once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
    pub index: BatchIndex,
    pub at: Instant,
}

/// Deterministic random material derived from a single seed.
///
/// The seed never changes after construction; only the activation record is
/// filled in, exactly once, when the batch becomes a session's current batch.
#[derive(Debug, Clone)]
pub struct RandomBatch {
    seed: u64,
    source: BatchSource,
    activation: Option<Activation>,
}

impl RandomBatch {
    /// Build a batch from a seed. Pure and infallible.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            seed,
            source: BatchSource::Initial,
            activation: None,
        }
    }

    /// Build a fallback batch from the next backup seed.
    pub fn from_backup(backup: &mut BackupGenerator) -> Self {
        Self {
            seed: backup.next_seed(),
            source: BatchSource::Backup,
            activation: None,
        }
    }

    /// Fetch a batch from the authority. Blocks for the duration of the call.
    ///
    /// Every failure (transport, rejection, malformed token) is logged and
    /// folded into `None`.
    pub fn from_authority(authority: &dyn Authority, run_id: RunId) -> Option<Self> {
        let bytes = match authority.fetch_batch(run_id) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(run_id, error = %err, "authority fetch failed");
                return None;
            }
        };

        match decode_batch_token(run_id, &bytes) {
            Ok(seed) => {
                debug!(run_id, "authority batch received");
                Some(Self {
                    seed,
                    source: BatchSource::Authority,
                    activation: None,
                })
            }
            Err(err) => {
                warn!(run_id, error = %err, "discarding authority response");
                None
            }
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn source(&self) -> BatchSource {
        self.source
    }

    pub fn is_degraded(&self) -> bool {
        self.source.is_degraded()
    }

    pub fn activation(&self) -> Option<Activation> {
        self.activation
    }

    pub fn activation_index(&self) -> Option<BatchIndex> {
        self.activation.map(|a| a.index)
    }

    /// Record activation.
    ///
    /// # Panics
    /// If the batch was already activated (a batch is never reactivated).
    pub fn activate(&mut self, index: BatchIndex, now: Instant) {
        assert!(
            self.activation.is_none(),
            "activate() called twice: batch already active at index {:?}",
            self.activation_index()
        );
        self.activation = Some(Activation { index, at: now });
    }

    /// True while `now - activation < normal`. False before activation.
    pub fn is_within_normal_window(&self, now: Instant, budgets: &WindowBudgets) -> bool {
        self.age(now).is_some_and(|age| age < budgets.normal)
    }

    /// True while `now - activation < normal + extra`. False before activation.
    pub fn is_within_extra_window(&self, now: Instant, budgets: &WindowBudgets) -> bool {
        self.age(now).is_some_and(|age| age < budgets.normal_plus_extra())
    }

    /// Deterministic generator for `(category, sub_key)`.
    pub fn generator(&self, category: Category, sub_key: Option<&str>) -> ChaCha20Rng {
        category_generator(self.seed, category.as_str(), sub_key)
    }

    /// Value for `(category, sub_key)`.
    ///
    /// Repeated calls with the same arguments return the same value; different
    /// arguments draw independent values.
    pub fn extract_value(&self, category: Category, sub_key: Option<&str>) -> u64 {
        self.generator(category, sub_key).next_u64()
    }

    fn age(&self, now: Instant) -> Option<std::time::Duration> {
        self.activation.map(|a| now.saturating_duration_since(a.at))
    }
}

/// Generator for a batch seed, category tag and optional sub-key.
///
/// Exposed by tag so verifiers can recompute values from audit records.
/// `None` and `Some("")` are distinct sub-keys.
pub fn category_generator(seed: u64, category_tag: &str, sub_key: Option<&str>) -> ChaCha20Rng {
    let mut hasher = Sha256::new();
    hasher.update(CATEGORY_DOMAIN_TAG);
    hasher.update(seed.to_le_bytes());
    hasher.update((category_tag.len() as u64).to_le_bytes());
    hasher.update(category_tag.as_bytes());
    match sub_key {
        None => hasher.update([0u8]),
        Some(key) => {
            hasher.update([1u8]);
            hasher.update((key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
        }
    }
    ChaCha20Rng::from_seed(hasher.finalize().into())
}

// ============================================================================
// Tests
// ============================================================================
