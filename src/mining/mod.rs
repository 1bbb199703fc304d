//! Proof-of-work search over a sealed record.
//!
//! A run tries nonces `0, 1, 2, ...` against the record hash and keeps the
//! best difficulty it has seen. It never stops on its own: the only exit is
//! cancellation, checked before every iteration.
//!
//! ## Difficulty
//!
//! `difficulty = u64::from_be_bytes(hash(record_hash || nonce)[..8])`.
//! Higher is better.

mod stats;

pub use stats::{MiningStats, StatsSnapshot};

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::crypto::{Digest, HashError, PowHasher, HASH_SIZE};
use crate::types::OraclePriceRecord;

/// Mining errors
#[derive(Debug, Error)]
pub enum MiningError {
    /// The hash engine failed; mining cannot continue anywhere
    #[error("hash engine failure: {0}")]
    HashEngine(#[from] HashError),
    /// The record was never sealed
    #[error("record hash not computed")]
    MissingRecordHash,
    /// The blocking mining task panicked or was aborted
    #[error("mining task failed: {0}")]
    Join(String),
}

/// Write the minimal big-endian bytes of `counter` into `out` (0 is empty)
pub fn encode_nonce(counter: u64, out: &mut Vec<u8>) {
    out.clear();
    let bytes = counter.to_be_bytes();
    let skip = (counter.leading_zeros() / 8) as usize;
    out.extend_from_slice(&bytes[skip..]);
}

fn difficulty_of(digest: &Digest) -> u64 {
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Difficulty of `nonce` against `record_hash`
///
/// # Errors
/// Returns error if the hash engine fails
pub fn compute_difficulty(
    hasher: &dyn PowHasher,
    record_hash: &Digest,
    nonce: &[u8],
) -> Result<u64, HashError> {
    let mut data = Vec::with_capacity(HASH_SIZE + nonce.len());
    data.extend_from_slice(record_hash);
    data.extend_from_slice(nonce);
    Ok(difficulty_of(&hasher.hash(&data)?))
}

/// Controller side of a cancellation pair
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: mpsc::Sender<()>,
}

impl CancelHandle {
    /// Ask the run to stop. Never blocks; repeated calls are harmless.
    pub fn cancel(&self) {
        // Full means a cancel is already pending, closed means the run is gone.
        let _ = self.tx.try_send(());
    }
}

/// Run side of a cancellation pair
#[derive(Debug)]
pub struct CancelSignal {
    rx: mpsc::Receiver<()>,
    cancelled: bool,
}

impl CancelSignal {
    /// Non-blocking poll. Once true, stays true. A dropped handle counts as a cancel.
    pub fn is_cancelled(&mut self) -> bool {
        if !self.cancelled {
            self.cancelled = match self.rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => true,
                Err(TryRecvError::Empty) => false,
            };
        }
        self.cancelled
    }
}

/// Create a linked handle/signal pair
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = mpsc::channel(1);
    (
        CancelHandle { tx },
        CancelSignal {
            rx,
            cancelled: false,
        },
    )
}

/// Summary of one finished run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MiningRun {
    /// Nonces tried
    pub iterations: u64,
    /// Times the best difficulty improved
    pub improvements: u64,
    /// Record difficulty when the run stopped
    pub best_difficulty: u64,
}

/// A record handed back by a finished mining task
#[derive(Clone, Debug)]
pub struct MinedRecord {
    /// The record with its best nonce and difficulty
    pub record: OraclePriceRecord,
    /// Run summary
    pub run: MiningRun,
}

/// Proof-of-work searcher
#[derive(Clone)]
pub struct Miner {
    hasher: Arc<dyn PowHasher>,
    stats: Arc<MiningStats>,
}

impl Miner {
    /// Create a miner over a shared hasher
    #[must_use]
    pub fn new(hasher: Arc<dyn PowHasher>, stats: Arc<MiningStats>) -> Self {
        Self { hasher, stats }
    }

    /// Shared statistics
    #[must_use]
    pub fn stats(&self) -> &Arc<MiningStats> {
        &self.stats
    }

    /// Search nonces until `cancel` fires.
    ///
    /// Difficulty and nonce on `record` only change together, and only on a
    /// strict improvement. A cancel that is already pending means zero
    /// iterations.
    ///
    /// # Errors
    /// Returns error if the record is unsealed or the hash engine fails
    pub fn mine(
        &self,
        record: &mut OraclePriceRecord,
        cancel: &mut CancelSignal,
    ) -> Result<MiningRun, MiningError> {
        let record_hash = *record.record_hash().ok_or(MiningError::MissingRecordHash)?;

        let mut data = Vec::with_capacity(HASH_SIZE + 8);
        data.extend_from_slice(&record_hash);
        let mut nonce = Vec::with_capacity(8);
        let mut run = MiningRun {
            best_difficulty: record.difficulty,
            ..MiningRun::default()
        };

        let mut counter: u64 = 0;
        while !cancel.is_cancelled() {
            encode_nonce(counter, &mut nonce);
            data.truncate(HASH_SIZE);
            data.extend_from_slice(&nonce);

            let difficulty = difficulty_of(&self.hasher.hash(&data)?);
            if difficulty > record.difficulty {
                record.record_best(difficulty, &nonce);
                run.improvements += 1;
            }

            counter = counter.wrapping_add(1);
            run.iterations += 1;
        }

        run.best_difficulty = record.difficulty;
        self.stats.record_run(run.iterations, run.best_difficulty);
        debug!(
            opr_hash = %hex::encode(record_hash),
            difficulty = run.best_difficulty,
            nonce = %hex::encode(record.nonce()),
            iterations = run.iterations,
            "Mined OPR"
        );
        Ok(run)
    }
}

/// A mining run on the blocking thread pool
#[derive(Debug)]
pub struct MiningTask {
    handle: CancelHandle,
    join: JoinHandle<Result<MinedRecord, MiningError>>,
}

/// Start mining `record` on a blocking thread
#[must_use]
pub fn spawn_mining(miner: Miner, mut record: OraclePriceRecord) -> MiningTask {
    let (handle, mut signal) = cancel_pair();
    let join = tokio::task::spawn_blocking(move || -> Result<MinedRecord, MiningError> {
        let run = miner.mine(&mut record, &mut signal)?;
        Ok(MinedRecord { record, run })
    });
    MiningTask { handle, join }
}

impl MiningTask {
    /// A handle that can cancel this run from elsewhere
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// Whether the run has already stopped
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the run and wait for the record
    ///
    /// # Errors
    /// Returns error if mining failed or the task panicked
    pub async fn cancel_and_join(self) -> Result<MinedRecord, MiningError> {
        self.handle.cancel();
        self.join
            .await
            .map_err(|e| MiningError::Join(e.to_string()))?
    }
}
