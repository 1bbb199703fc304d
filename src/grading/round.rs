//! One interval's grading lifecycle.

use tracing::{debug, info};

use crate::config::Config;
use crate::types::{now_millis, OraclePriceRecord, Slate, Timestamp};
use crate::validator::Validator;

use super::{grade, GradingError};

/// Phase of a grading round
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundPhase {
    /// Accepting candidates
    Collecting,
    /// Deadline passed or closed explicitly
    Closed,
    /// Winners chosen
    Graded,
    /// Slate handed out; terminal
    Published,
}

/// Grading round for one block height.
///
/// Moves strictly forward: `Collecting → Closed → Graded → Published`.
/// A new interval starts a new round.
#[derive(Clone, Debug)]
pub struct GradingRound {
    /// Block height being graded
    pub height: i32,
    phase: RoundPhase,
    deadline: Timestamp,
    max_winners: usize,
    validator: Validator,
    config: Config,
    candidates: Vec<OraclePriceRecord>,
    winners: Vec<OraclePriceRecord>,
}

impl GradingRound {
    /// Open a round that closes itself `window_ms` from now
    #[must_use]
    pub fn new(
        height: i32,
        max_winners: usize,
        window_ms: i64,
        validator: Validator,
        config: Config,
    ) -> Self {
        Self {
            height,
            phase: RoundPhase::Collecting,
            deadline: now_millis() + window_ms,
            max_winners,
            validator,
            config,
            candidates: Vec::new(),
            winners: Vec::new(),
        }
    }

    /// Current phase
    #[must_use]
    pub const fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// When collection ends
    #[must_use]
    pub const fn deadline(&self) -> Timestamp {
        self.deadline
    }

    /// Candidates accepted so far
    #[must_use]
    pub fn candidates(&self) -> &[OraclePriceRecord] {
        &self.candidates
    }

    /// Ranked winners, once graded
    #[must_use]
    pub fn winners(&self) -> &[OraclePriceRecord] {
        &self.winners
    }

    fn require_phase(&self, phase: RoundPhase, action: &'static str) -> Result<(), GradingError> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(GradingError::InvalidTransition {
                phase: self.phase,
                action,
            })
        }
    }

    /// Add a mined candidate
    ///
    /// # Errors
    /// Returns error if the round is not collecting, or the record is
    /// unsealed, invalid or already submitted
    pub fn submit(&mut self, record: OraclePriceRecord) -> Result<(), GradingError> {
        self.require_phase(RoundPhase::Collecting, "submit")?;

        let hash = record.record_hash().ok_or(GradingError::Unsealed)?;
        self.validator.check(&record, &self.config)?;

        let duplicate = self
            .candidates
            .iter()
            .any(|c| c.record_hash() == Some(hash) && c.nonce() == record.nonce());
        if duplicate {
            return Err(GradingError::Duplicate);
        }

        debug!(height = self.height, did = %record.did(), difficulty = record.difficulty, "Candidate accepted");
        self.candidates.push(record);
        Ok(())
    }

    /// Stop collecting
    ///
    /// # Errors
    /// Returns error if the round is not collecting
    pub fn close(&mut self) -> Result<(), GradingError> {
        self.require_phase(RoundPhase::Collecting, "close")?;
        self.phase = RoundPhase::Closed;
        Ok(())
    }

    /// Close if `now` is at or past the deadline. Returns whether the round is closed.
    pub fn close_if_due(&mut self, now: Timestamp) -> bool {
        if self.phase == RoundPhase::Collecting && now >= self.deadline {
            self.phase = RoundPhase::Closed;
        }
        self.phase != RoundPhase::Collecting
    }

    /// Rank the candidates
    ///
    /// # Errors
    /// Returns error if the round is not closed
    pub fn grade(&mut self) -> Result<&[OraclePriceRecord], GradingError> {
        self.require_phase(RoundPhase::Closed, "grade")?;
        self.winners = grade(std::mem::take(&mut self.candidates), self.max_winners);
        self.phase = RoundPhase::Graded;
        Ok(&self.winners)
    }

    /// Produce the slate for the next interval
    ///
    /// # Errors
    /// Returns error if the round is not graded or a winner cannot be encoded
    pub fn publish(&mut self) -> Result<Slate, GradingError> {
        self.require_phase(RoundPhase::Graded, "publish")?;
        let slate = Slate::from_winners(&self.winners)?;
        self.phase = RoundPhase::Published;
        info!(height = self.height, winners = slate.filled(), "Published winners");
        Ok(slate)
    }
}
