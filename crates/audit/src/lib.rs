//! runseal Audit Trail
//!
//! This crate records what a session did with its random material and lets
//! a third party check it afterwards.
//!
//! # Architecture
//!
//! - `AuditRecorder`: collects batch activations and draws during a session
//! - `verify_audit`: recomputes the seed chain and every recorded draw
//! - `write_audit` / `read_audit`: artifact persistence
//!
//! Authority-issued seeds cannot be recomputed locally; the verifier trusts
//! them as recorded and checks everything derived from them.

#![deny(unsafe_code)]

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use prost::Message;
use rand::RngCore;
use runseal_core::{
    BackupGenerator, BatchIndex, BatchSource, Category, DERIVATION_ALGO_ID, RunId, SessionSeeds,
    category_generator,
};
use runseal_wire::{ActivationRecordProto, AuditArtifact, BatchSourceProto, DrawRecordProto};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Current audit artifact schema version.
pub const AUDIT_FORMAT_VERSION: u32 = 1;

/// Domain separation prefix for the artifact digest.
const DIGEST_DOMAIN_TAG: &[u8] = b"runseal/audit/v1";

// ============================================================================
// Records
// ============================================================================

/// One batch activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRecord {
    pub index: BatchIndex,
    pub seed: u64,
    pub source: BatchSource,
    pub elapsed_ms: u64,
}

impl From<ActivationRecord> for ActivationRecordProto {
    fn from(record: ActivationRecord) -> Self {
        let source = match record.source {
            BatchSource::Initial => BatchSourceProto::Initial,
            BatchSource::Authority => BatchSourceProto::Authority,
            BatchSource::Backup => BatchSourceProto::Backup,
        };
        Self {
            index: record.index,
            seed: record.seed,
            source: source as i32,
            elapsed_ms: record.elapsed_ms,
        }
    }
}

impl TryFrom<&ActivationRecordProto> for ActivationRecord {
    type Error = VerifyError;

    fn try_from(proto: &ActivationRecordProto) -> Result<Self, Self::Error> {
        let source = match proto.source_kind() {
            BatchSourceProto::Initial => BatchSource::Initial,
            BatchSourceProto::Authority => BatchSource::Authority,
            BatchSourceProto::Backup => BatchSource::Backup,
            BatchSourceProto::Unspecified => {
                return Err(VerifyError::InvalidFormat {
                    reason: format!("activation {} has no source", proto.index),
                });
            }
        };
        Ok(Self {
            index: proto.index,
            seed: proto.seed,
            source,
            elapsed_ms: proto.elapsed_ms,
        })
    }
}

/// One value handed to a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRecord {
    pub batch_index: BatchIndex,
    pub category: Category,
    pub sub_key: Option<String>,
    pub value: u64,
}

impl From<DrawRecord> for DrawRecordProto {
    fn from(record: DrawRecord) -> Self {
        Self {
            batch_index: record.batch_index,
            category: record.category.as_str().to_string(),
            sub_key: record.sub_key,
            value: record.value,
        }
    }
}

// ============================================================================
// Audit Recorder
// ============================================================================

/// Configuration for audit recording.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub run_id: RunId,
    /// Absent for sessions reattached by run id.
    pub session_seed: Option<u64>,
    /// Record individual draws (activations are always recorded).
    pub record_draws: bool,
}

/// Collects a session's activations and draws.
#[derive(Debug)]
pub struct AuditRecorder {
    config: AuditConfig,
    activations: Vec<ActivationRecord>,
    draws: Vec<DrawRecord>,
}

impl AuditRecorder {
    pub fn new(config: AuditConfig) -> Self {
        Self {
            config,
            activations: Vec::new(),
            draws: Vec::new(),
        }
    }

    pub fn record_activation(&mut self, record: ActivationRecord) {
        self.activations.push(record);
    }

    pub fn record_draw(&mut self, record: DrawRecord) {
        if self.config.record_draws {
            self.draws.push(record);
        }
    }

    pub fn activations(&self) -> &[ActivationRecord] {
        &self.activations
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// Finalize into a sealed artifact.
    pub fn finalize(self, end_reason: &str) -> AuditArtifact {
        let mut artifact = AuditArtifact {
            audit_format_version: AUDIT_FORMAT_VERSION,
            run_id: self.config.run_id,
            session_seed: self.config.session_seed,
            derivation_algo_id: DERIVATION_ALGO_ID.to_string(),
            activations: self.activations.into_iter().map(Into::into).collect(),
            draws: self.draws.into_iter().map(Into::into).collect(),
            end_reason: end_reason.to_string(),
            digest: String::new(),
        };
        artifact.digest = audit_digest(&artifact);
        debug!(
            run_id = artifact.run_id,
            activations = artifact.activations.len(),
            draws = artifact.draws.len(),
            "audit artifact finalized"
        );
        artifact
    }
}

/// Lowercase hex SHA-256 over the canonical encoding of an artifact.
///
/// Covers every field except `digest` itself and the informational
/// `elapsed_ms`. Integers are little-endian; strings are length-prefixed;
/// optional values carry a presence byte.
pub fn audit_digest(artifact: &AuditArtifact) -> String {
    let mut hasher = Sha256::new();
    hasher.update(DIGEST_DOMAIN_TAG);
    hasher.update(artifact.audit_format_version.to_le_bytes());
    hasher.update(artifact.run_id.to_le_bytes());
    update_optional_u64(&mut hasher, artifact.session_seed);
    update_str(&mut hasher, &artifact.derivation_algo_id);

    hasher.update((artifact.activations.len() as u64).to_le_bytes());
    for activation in &artifact.activations {
        hasher.update(activation.index.to_le_bytes());
        hasher.update(activation.seed.to_le_bytes());
        hasher.update(activation.source.to_le_bytes());
    }

    hasher.update((artifact.draws.len() as u64).to_le_bytes());
    for draw in &artifact.draws {
        hasher.update(draw.batch_index.to_le_bytes());
        update_str(&mut hasher, &draw.category);
        match &draw.sub_key {
            None => hasher.update([0u8]),
            Some(key) => {
                hasher.update([1u8]);
                update_str(&mut hasher, key);
            }
        }
        hasher.update(draw.value.to_le_bytes());
    }

    update_str(&mut hasher, &artifact.end_reason);
    format!("{:x}", hasher.finalize())
}

fn update_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn update_optional_u64(hasher: &mut Sha256, value: Option<u64>) {
    match value {
        None => hasher.update([0u8]),
        Some(v) => {
            hasher.update([1u8]);
            hasher.update(v.to_le_bytes());
        }
    }
}

// ============================================================================
// Audit Verification
// ============================================================================

/// Audit verification error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("unsupported audit format version {0}")]
    UnsupportedVersion(u32),

    #[error("derivation algorithm mismatch: expected {expected}, got {actual}")]
    AlgorithmMismatch { expected: String, actual: String },

    #[error("audit digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Activation indices must run 0, 1, 2, ... without gaps or repeats.
    #[error("activation at position {position} carries index {index}")]
    ActivationSequence { position: usize, index: BatchIndex },

    #[error("session seed required but artifact has none")]
    MissingSessionSeed,

    #[error("seed chain mismatch at activation {index}: expected {expected:#x}, got {actual:#x}")]
    SeedChainMismatch {
        index: BatchIndex,
        expected: u64,
        actual: u64,
    },

    #[error("draw {position} references unknown batch {batch_index}")]
    UnknownBatch {
        position: usize,
        batch_index: BatchIndex,
    },

    #[error("draw {position} mismatch: expected {expected:#x}, got {actual:#x}")]
    DrawMismatch {
        position: usize,
        expected: u64,
        actual: u64,
    },

    #[error("invalid audit format: {reason}")]
    InvalidFormat { reason: String },
}

/// Options for audit verification.
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Fail when the artifact carries no session seed (reattached sessions).
    pub require_session_seed: bool,
}

/// Verify an audit artifact.
///
/// # Verification Steps
/// 1. Format version and derivation algorithm are supported
/// 2. Digest matches the canonical encoding
/// 3. Activation indices are contiguous from 0
/// 4. Seed chain: initial batch and every backup seed, in order (when the
///    session seed is known)
/// 5. Every recorded draw recomputes to the recorded value
pub fn verify_audit(artifact: &AuditArtifact, options: &VerifyOptions) -> Result<(), VerifyError> {
    // Step 1: Format
    if artifact.audit_format_version != AUDIT_FORMAT_VERSION {
        return Err(VerifyError::UnsupportedVersion(
            artifact.audit_format_version,
        ));
    }
    if artifact.derivation_algo_id != DERIVATION_ALGO_ID {
        return Err(VerifyError::AlgorithmMismatch {
            expected: DERIVATION_ALGO_ID.to_string(),
            actual: artifact.derivation_algo_id.clone(),
        });
    }

    // Step 2: Digest
    let actual_digest = audit_digest(artifact);
    if actual_digest != artifact.digest {
        return Err(VerifyError::DigestMismatch {
            expected: artifact.digest.clone(),
            actual: actual_digest,
        });
    }

    // Step 3: Activation sequence
    let activations = artifact
        .activations
        .iter()
        .map(ActivationRecord::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    for (position, activation) in activations.iter().enumerate() {
        if activation.index != position as BatchIndex {
            return Err(VerifyError::ActivationSequence {
                position,
                index: activation.index,
            });
        }
    }

    // Step 4: Seed chain
    verify_seed_chain(artifact.session_seed, &activations, options)?;

    // Step 5: Draws
    for (position, draw) in artifact.draws.iter().enumerate() {
        let batch = activations
            .get(draw.batch_index as usize)
            .ok_or(VerifyError::UnknownBatch {
                position,
                batch_index: draw.batch_index,
            })?;
        let category =
            Category::from_tag(&draw.category).ok_or_else(|| VerifyError::InvalidFormat {
                reason: format!("draw {position} has unknown category {:?}", draw.category),
            })?;
        let expected =
            category_generator(batch.seed, category.as_str(), draw.sub_key.as_deref()).next_u64();
        if expected != draw.value {
            return Err(VerifyError::DrawMismatch {
                position,
                expected,
                actual: draw.value,
            });
        }
    }

    Ok(())
}

fn verify_seed_chain(
    session_seed: Option<u64>,
    activations: &[ActivationRecord],
    options: &VerifyOptions,
) -> Result<(), VerifyError> {
    let Some(session_seed) = session_seed else {
        if options.require_session_seed {
            return Err(VerifyError::MissingSessionSeed);
        }
        // Reattached sessions have no seed chain: no initial batch, no backup.
        if let Some(bad) = activations
            .iter()
            .find(|a| a.source != BatchSource::Authority)
        {
            return Err(VerifyError::InvalidFormat {
                reason: format!(
                    "activation {} is {} but the session has no seed chain",
                    bad.index,
                    bad.source.as_str()
                ),
            });
        }
        return Ok(());
    };

    // A known session seed fixes batch 0.
    match activations.first() {
        Some(first) if first.source == BatchSource::Initial => {}
        Some(first) => {
            return Err(VerifyError::InvalidFormat {
                reason: format!(
                    "session seed is recorded but batch 0 is {}",
                    first.source.as_str()
                ),
            });
        }
        None => {
            return Err(VerifyError::InvalidFormat {
                reason: "session seed is recorded but no batch was activated".to_string(),
            });
        }
    }

    let seeds = SessionSeeds::derive(session_seed);
    let mut backup = BackupGenerator::new(seeds.backup);

    for activation in activations {
        let expected = match activation.source {
            BatchSource::Initial if activation.index == 0 => seeds.initial_batch,
            BatchSource::Initial => {
                return Err(VerifyError::InvalidFormat {
                    reason: format!("initial batch activated at index {}", activation.index),
                });
            }
            BatchSource::Backup => backup.next_seed(),
            BatchSource::Authority => continue,
        };
        if expected != activation.seed {
            return Err(VerifyError::SeedChainMismatch {
                index: activation.index,
                expected,
                actual: activation.seed,
            });
        }
    }

    Ok(())
}

// ============================================================================
// Audit I/O
// ============================================================================

/// Write an audit artifact to a file.
///
/// Refuses to overwrite, and refuses artifacts that do not pass
/// [`verify_audit`] with default options so a sealed file is always
/// verifiable.
pub fn write_audit(artifact: &AuditArtifact, path: &Path) -> io::Result<()> {
    verify_audit(artifact, &VerifyOptions::default()).map_err(|err| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("refusing to write unverifiable audit artifact: {err}"),
        )
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    if path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("Audit artifact already exists at {}", path.display()),
        ));
    }

    let encoded = artifact.encode_to_vec();
    let mut file = fs::File::create(path)?;
    file.write_all(&encoded)?;

    Ok(())
}

/// Read an audit artifact from a file.
pub fn read_audit(path: &Path) -> io::Result<AuditArtifact> {
    let data = fs::read(path)?;
    AuditArtifact::decode(data.as_slice()).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to decode audit artifact: {e}"),
        )
    })
}

// ============================================================================
// Tests
// ============================================================================
