//! Mining statistics shared across runs.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Totals published by finished mining runs
#[derive(Debug, Default)]
pub struct MiningStats {
    runs: AtomicU64,
    hashes: AtomicU64,
    best_difficulty: AtomicU64,
}

/// Point-in-time copy of [`MiningStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Finished runs
    pub runs: u64,
    /// Hashes computed across all runs
    pub hashes: u64,
    /// Highest difficulty ever found
    pub best_difficulty: u64,
}

impl MiningStats {
    /// Fresh counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish one finished run
    pub fn record_run(&self, iterations: u64, best: u64) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.hashes.fetch_add(iterations, Ordering::Relaxed);
        self.best_difficulty.fetch_max(best, Ordering::Relaxed);
    }

    /// Read all counters
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            runs: self.runs.load(Ordering::Relaxed),
            hashes: self.hashes.load(Ordering::Relaxed),
            best_difficulty: self.best_difficulty.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_run() {
        let stats = MiningStats::new();
        stats.record_run(100, 7);
        stats.record_run(50, 3);
        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                runs: 2,
                hashes: 150,
                best_difficulty: 7,
            }
        );
    }
}
