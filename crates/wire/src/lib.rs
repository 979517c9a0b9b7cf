//! runseal Wire Types
//!
//! Protobuf messages exchanged with the randomness authority and persisted in
//! audit artifacts. The session, audit and verification sides all depend on
//! this crate so that encoded bytes mean the same thing everywhere.
//!
//! # Message Categories
//!
//! - **Authority tokens**: `StartRunToken` (run handshake) and `BatchToken`
//!   (one rotation's worth of seed material)
//! - **Audit records**: `ActivationRecordProto`, `DrawRecordProto` and the
//!   enclosing `AuditArtifact`

#![deny(unsafe_code)]

use prost::Message;

// ============================================================================
// Type Aliases
// ============================================================================

/// Run identifier as carried on the wire.
pub type RunId = u64;

/// Activation index of a batch within a session.
pub type BatchIndex = u64;

// ============================================================================
// Authority Tokens
// ============================================================================

/// Token issued by the authority when a run starts.
///
/// `seed` initialises the session seed chain (initial batch, then backup
/// generator).
#[derive(Clone, PartialEq, Message)]
pub struct StartRunToken {
    #[prost(uint64, tag = "1")]
    pub run_id: RunId,

    #[prost(uint64, tag = "2")]
    pub seed: u64,
}

/// Seed material for one rotation period, issued per fetch.
///
/// `run_id` echoes the requesting run; a mismatch marks the token malformed.
#[derive(Clone, PartialEq, Message)]
pub struct BatchToken {
    #[prost(uint64, tag = "1")]
    pub run_id: RunId,

    #[prost(uint64, tag = "2")]
    pub seed: u64,
}

// ============================================================================
// Audit Records
// ============================================================================

/// Where an activated batch's seed came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum BatchSourceProto {
    Unspecified = 0,
    /// First draw of the session seed chain.
    Initial = 1,
    /// Fetched from the authority.
    Authority = 2,
    /// Drawn from the local backup generator.
    Backup = 3,
}

/// One batch activation.
#[derive(Clone, PartialEq, Message)]
pub struct ActivationRecordProto {
    #[prost(uint64, tag = "1")]
    pub index: BatchIndex,

    #[prost(uint64, tag = "2")]
    pub seed: u64,

    #[prost(enumeration = "BatchSourceProto", tag = "3")]
    pub source: i32,

    /// Milliseconds since session construction (informational, not digested).
    #[prost(uint64, tag = "4")]
    pub elapsed_ms: u64,
}

/// One value handed to a caller.
#[derive(Clone, PartialEq, Message)]
pub struct DrawRecordProto {
    #[prost(uint64, tag = "1")]
    pub batch_index: BatchIndex,

    /// Stable category tag (e.g. "block_drop").
    #[prost(string, tag = "2")]
    pub category: String,

    #[prost(string, optional, tag = "3")]
    pub sub_key: Option<String>,

    #[prost(uint64, tag = "4")]
    pub value: u64,
}

/// Complete audit artifact for one session.
#[derive(Clone, PartialEq, Message)]
pub struct AuditArtifact {
    /// Schema version (starts at 1).
    #[prost(uint32, tag = "1")]
    pub audit_format_version: u32,

    #[prost(uint64, tag = "2")]
    pub run_id: RunId,

    /// Session seed; absent for sessions reattached by run id.
    #[prost(uint64, optional, tag = "3")]
    pub session_seed: Option<u64>,

    /// Identifier of the value derivation algorithm.
    #[prost(string, tag = "4")]
    pub derivation_algo_id: String,

    /// Activations in activation order.
    #[prost(message, repeated, tag = "5")]
    pub activations: Vec<ActivationRecordProto>,

    /// Draws in call order.
    #[prost(message, repeated, tag = "6")]
    pub draws: Vec<DrawRecordProto>,

    /// Session termination reason.
    #[prost(string, tag = "7")]
    pub end_reason: String,

    /// Lowercase hex SHA-256 over the canonical record encoding.
    #[prost(string, tag = "8")]
    pub digest: String,
}

impl ActivationRecordProto {
    /// Decoded source, `Unspecified` for unknown values.
    pub fn source_kind(&self) -> BatchSourceProto {
        BatchSourceProto::try_from(self.source).unwrap_or(BatchSourceProto::Unspecified)
    }
}

// ============================================================================
// Tests
// ============================================================================
