//! runseal Core
//!
//! Deterministic random material for verifiable sessions. A [`RandomBatch`]
//! is derived from one 64-bit seed and hands out values per [`Category`]
//! (plus an optional sub-key); the same batch seed, category and sub-key
//! always produce the same value, which is what lets a third party replay a
//! session's outcomes.
//!
//! # Architecture Constraints
//!
//! This crate MUST NOT:
//! - Spawn threads or block on anything other than an explicit
//!   [`Authority`] call
//! - Read wall-clock time except through an injected [`Clock`]
//! - Use ambient/unseeded randomness
//!
//! Scheduling of fetches and rotation policy belong to the session crate.

#![deny(unsafe_code)]

pub mod authority;
pub mod backup;
pub mod batch;
pub mod clock;

use std::fmt;
use std::time::Duration;

pub use authority::{Authority, AuthorityError};
pub use backup::{BackupGenerator, SessionSeeds};
pub use batch::{Activation, BatchSource, RandomBatch, category_generator};
pub use clock::{Clock, ManualClock, SystemClock};

// ============================================================================
// Type Aliases
// ============================================================================

/// Stable identifier correlating a session with the authority's records.
pub type RunId = runseal_wire::RunId;

/// Activation order of a batch within its session (0-based).
pub type BatchIndex = runseal_wire::BatchIndex;

// ============================================================================
// Derivation Constants
// ============================================================================

/// Value derivation algorithm identifier, recorded in audit artifacts.
///
/// Category seed = SHA-256 over (domain tag, batch seed LE, category tag,
/// sub-key), used as a ChaCha20 key; a value is the first `u64` of that stream.
pub const DERIVATION_ALGO_ID: &str = "runseal-v1-sha256-chacha20-le";

/// Domain separation prefix for category seed derivation.
pub(crate) const CATEGORY_DOMAIN_TAG: &[u8] = b"runseal/category/v1";

// ============================================================================
// Window Budgets
// ============================================================================

/// Time a batch is considered fully fresh after activation.
pub const NORMAL_BUDGET: Duration = Duration::from_secs(30);

/// Grace time beyond the normal budget tolerated while no replacement is ready.
pub const EXTRA_BUDGET: Duration = Duration::from_secs(15);

/// Freshness budgets for activated batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBudgets {
    pub normal: Duration,
    pub extra: Duration,
}

impl WindowBudgets {
    /// Total lifetime of a batch before the session must fall back.
    pub fn normal_plus_extra(&self) -> Duration {
        self.normal.saturating_add(self.extra)
    }
}

impl Default for WindowBudgets {
    fn default() -> Self {
        Self {
            normal: NORMAL_BUDGET,
            extra: EXTRA_BUDGET,
        }
    }
}

// ============================================================================
// Category
// ============================================================================

/// Gameplay concern a value is drawn for.
///
/// The tag is part of the derivation input and of audit records; tags MUST
/// NOT change once artifacts exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    WorldSeed,
    BlockDrop,
    EntityDrop,
    Enchantment,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Self::WorldSeed,
        Self::BlockDrop,
        Self::EntityDrop,
        Self::Enchantment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorldSeed => "world_seed",
            Self::BlockDrop => "block_drop",
            Self::EntityDrop => "entity_drop",
            Self::Enchantment => "enchantment",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == tag)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================
