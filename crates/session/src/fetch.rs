//! Single-slot asynchronous batch fetch.
//!
//! Each fetch runs on its own named worker thread and reports exactly once
//! through a one-slot channel. A fetch that is not waited for in time is
//! abandoned: the worker finishes on its own and its send goes nowhere.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use runseal_core::{Authority, RandomBatch, RunId};
use tracing::error;

/// Result of observing a pending fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The authority delivered a batch.
    Ready(RandomBatch),
    /// The authority call failed or returned a malformed token.
    Failed,
    /// No result within the wait bound; the fetch is abandoned.
    TimedOut,
    /// The worker went away without reporting (spawn failure or panic).
    Lost,
}

impl FetchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Lost => "lost",
        }
    }
}

/// An in-flight fetch for the next batch.
#[derive(Debug)]
pub struct PendingFetch {
    generation: u64,
    receiver: Receiver<Option<RandomBatch>>,
    worker: Option<JoinHandle<()>>,
}

impl PendingFetch {
    /// Start fetching a batch for `run_id` on a new worker thread.
    ///
    /// Never fails: if the worker cannot be spawned the fetch reports `Lost`.
    pub fn spawn(authority: Arc<dyn Authority>, run_id: RunId, generation: u64) -> Self {
        let (sender, receiver) = mpsc::sync_channel(1);

        let worker = thread::Builder::new()
            .name(format!("runseal-fetch-{run_id}-{generation}"))
            .spawn(move || {
                let batch = RandomBatch::from_authority(authority.as_ref(), run_id);
                // Receiver is gone when the fetch was abandoned.
                let _ = sender.send(batch);
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!(run_id, generation, error = %err, "failed to spawn fetch worker");
                None
            }
        };

        Self {
            generation,
            receiver,
            worker,
        }
    }

    /// Sequence number of this fetch within its session.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True once the worker has reported (or died).
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Non-blocking check. `None` while the worker is still running.
    pub fn poll(&self) -> Option<FetchOutcome> {
        match self.receiver.try_recv() {
            Ok(Some(batch)) => Some(FetchOutcome::Ready(batch)),
            Ok(None) => Some(FetchOutcome::Failed),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(FetchOutcome::Lost),
        }
    }

    /// Wait at most `timeout` for the result.
    pub fn wait(self, timeout: Duration) -> FetchOutcome {
        match self.receiver.recv_timeout(timeout) {
            Ok(Some(batch)) => FetchOutcome::Ready(batch),
            Ok(None) => FetchOutcome::Failed,
            Err(RecvTimeoutError::Timeout) => FetchOutcome::TimedOut,
            Err(RecvTimeoutError::Disconnected) => FetchOutcome::Lost,
        }
    }
}
