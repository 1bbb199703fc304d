//! Grading: choosing an interval's winners.
//!
//! Candidates are ranked by difficulty, highest first. Ties fall back to the
//! record hash and then the nonce so that every grader holding the same set
//! produces the same order. The top records form the slate the next
//! interval's records point back to.

mod round;

pub use round::{GradingRound, RoundPhase};

use std::cmp::Ordering;
use std::collections::BTreeMap;

use thiserror::Error;

use crate::types::{OraclePriceRecord, RecordError, SLATE_SIZE};
use crate::validator::ValidationError;

/// Grading errors
#[derive(Debug, Error)]
pub enum GradingError {
    /// Operation not allowed in the round's current phase
    #[error("cannot {action} while {phase:?}")]
    InvalidTransition {
        /// Phase the round was in
        phase: RoundPhase,
        /// What was attempted
        action: &'static str,
    },
    /// Candidate failed validation
    #[error("invalid candidate: {0}")]
    InvalidRecord(#[from] ValidationError),
    /// Same record hash and nonce already submitted
    #[error("duplicate candidate")]
    Duplicate,
    /// Candidate has no record hash
    #[error("candidate was never sealed")]
    Unsealed,
    /// A winner could not be turned into a slate entry
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Ranking order: difficulty descending, then record hash, then nonce
#[must_use]
pub fn cmp_candidates(a: &OraclePriceRecord, b: &OraclePriceRecord) -> Ordering {
    b.difficulty
        .cmp(&a.difficulty)
        .then_with(|| a.record_hash().cmp(&b.record_hash()))
        .then_with(|| a.nonce().cmp(b.nonce()))
}

/// Score each candidate's distance from the set's average prices.
///
/// The grade is the sum over assets of the fourth power of the relative
/// deviation from the average; lower is closer to consensus. Assets averaging
/// zero are skipped.
pub fn assign_grades(candidates: &mut [OraclePriceRecord]) {
    let mut sums: BTreeMap<&str, (f64, u32)> = BTreeMap::new();
    for opr in candidates.iter() {
        for (code, value) in opr.assets.iter() {
            let entry = sums.entry(code).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    let averages: BTreeMap<String, f64> = sums
        .into_iter()
        .map(|(code, (sum, n))| (code.to_string(), sum / f64::from(n)))
        .collect();

    for opr in candidates.iter_mut() {
        opr.grade = opr
            .assets
            .iter()
            .filter_map(|(code, value)| {
                let avg = *averages.get(code)?;
                (avg != 0.0).then(|| ((value - avg) / avg).powi(4))
            })
            .sum();
    }
}

/// Rank `candidates` and keep the best `max_winners` (at most [`SLATE_SIZE`])
#[must_use]
pub fn grade(mut candidates: Vec<OraclePriceRecord>, max_winners: usize) -> Vec<OraclePriceRecord> {
    assign_grades(&mut candidates);
    candidates.sort_by(cmp_candidates);
    candidates.truncate(max_winners.min(SLATE_SIZE));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ChainIdentity;
    use crate::types::{AssetList, Slate};
    use proptest::prelude::*;

    fn candidate(difficulty: u64, hash_byte: u8) -> OraclePriceRecord {
        let mut assets = AssetList::new();
        assets.insert("USD", 1.0);
        let mut opr = OraclePriceRecord::new(
            ChainIdentity::derive("PegNet", "TestNet"),
            1,
            Slate::empty(),
            String::new(),
            vec!["prototype".to_string()],
            assets,
        )
        .with_record_hash([hash_byte; 32]);
        opr.difficulty = difficulty;
        opr
    }

    #[test]
    fn test_highest_difficulty_wins() {
        let winners = grade(vec![candidate(500, 0xaa), candidate(900, 0xbb)], 1);
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].difficulty, 900);
    }

    #[test]
    fn test_tie_broken_by_hash() {
        let winners = grade(vec![candidate(500, 0xbb), candidate(500, 0xaa)], 2);
        assert_eq!(winners[0].record_hash(), Some(&[0xaa; 32]));
        assert_eq!(winners[1].record_hash(), Some(&[0xbb; 32]));
    }

    #[test]
    fn test_max_winners_clamped() {
        let candidates: Vec<_> = (0..15).map(|i| candidate(i, i as u8)).collect();
        assert_eq!(grade(candidates.clone(), 100).len(), SLATE_SIZE);
        assert_eq!(grade(candidates, 3).len(), 3);
        assert!(grade(Vec::new(), 10).is_empty());
    }

    #[test]
    fn test_grades_measure_deviation() {
        let mut outlier = candidate(1, 1);
        outlier.assets.insert("USD", 2.0);
        let mut candidates = vec![candidate(1, 2), candidate(1, 3), outlier];
        assign_grades(&mut candidates);
        assert!(candidates[2].grade > candidates[0].grade);
        assert!((candidates[0].grade - candidates[1].grade).abs() < f64::EPSILON);
    }

    #[test]
    fn test_slate_from_winners() {
        let winners = grade(vec![candidate(5, 1), candidate(9, 2)], 10);
        let slate = Slate::from_winners(&winners).unwrap();
        assert_eq!(slate.filled(), 2);
        assert_eq!(slate.slots()[0], winners[0].short_id().unwrap());
        assert!(slate.slots()[2].is_empty());
    }

    proptest! {
        #[test]
        fn prop_grading_is_stable(
            entries in prop::collection::vec((0u64..50, any::<u8>()), 1..20),
            shuffle_seed in any::<u64>(),
        ) {
            let candidates: Vec<_> = entries.iter().map(|(d, h)| candidate(*d, *h)).collect();
            let mut reordered = candidates.clone();
            let len = reordered.len();
            reordered.rotate_left((shuffle_seed as usize) % len);

            let order = |v: Vec<OraclePriceRecord>| -> Vec<(u64, Option<[u8; 32]>)> {
                grade(v, SLATE_SIZE)
                    .iter()
                    .map(|o| (o.difficulty, o.record_hash().copied()))
                    .collect()
            };
            prop_assert_eq!(order(candidates), order(reordered));
        }

        #[test]
        fn prop_raised_difficulty_ranks_first(
            difficulties in prop::collection::vec(0u64..1000, 1..12),
            pick in any::<prop::sample::Index>(),
        ) {
            let mut candidates: Vec<_> = difficulties
                .iter()
                .enumerate()
                .map(|(i, d)| candidate(*d, i as u8))
                .collect();
            let i = pick.index(candidates.len());
            candidates[i].difficulty = 1000;

            let winners = grade(candidates, 1);
            prop_assert_eq!(winners[0].record_hash().copied(), Some([i as u8; 32]));
        }
    }
}
