//! Remote randomness authority seam.
//!
//! The transport (HTTP or otherwise) is owned by the embedding application.
//! An [`Authority`] only has to turn a run id into the encoded bytes of a
//! `BatchToken`, or fail.

use prost::Message;
use runseal_wire::BatchToken;

use crate::RunId;

/// Failure reported by the authority or while decoding its response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    /// Transport-level failure (connect, timeout, reset).
    #[error("authority unreachable: {0}")]
    Unreachable(String),

    /// The authority answered but refused the request.
    #[error("authority rejected request with status {status}")]
    Rejected { status: u16 },

    /// The response could not be interpreted as a batch token.
    #[error("malformed authority response: {0}")]
    Malformed(String),
}

/// Blocking source of authority-issued batch tokens.
///
/// Implementations are called from fetch workers, never from the interactive
/// thread.
pub trait Authority: Send + Sync {
    fn fetch_batch(&self, run_id: RunId) -> Result<Vec<u8>, AuthorityError>;
}

impl<F> Authority for F
where
    F: Fn(RunId) -> Result<Vec<u8>, AuthorityError> + Send + Sync,
{
    fn fetch_batch(&self, run_id: RunId) -> Result<Vec<u8>, AuthorityError> {
        self(run_id)
    }
}

/// Decode a batch token and check it was issued for `run_id`.
pub fn decode_batch_token(run_id: RunId, bytes: &[u8]) -> Result<u64, AuthorityError> {
    let token =
        BatchToken::decode(bytes).map_err(|e| AuthorityError::Malformed(e.to_string()))?;
    if token.run_id != run_id {
        return Err(AuthorityError::Malformed(format!(
            "token issued for run {}, expected {run_id}",
            token.run_id
        )));
    }
    Ok(token.seed)
}

/// Encode a batch token (used by authority implementations and tests).
pub fn encode_batch_token(run_id: RunId, seed: u64) -> Vec<u8> {
    BatchToken { run_id, seed }.encode_to_vec()
}
