//! The winner slate carried from one interval into the next.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{OraclePriceRecord, RecordError};

/// Number of winners named by every record
pub const SLATE_SIZE: usize = 10;

/// Fixed-size ordered list of winner short ids.
///
/// Unfilled slots hold empty strings; the length never changes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slate([String; SLATE_SIZE]);

impl Slate {
    /// An all-empty slate (first interval of a chain)
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fill slots in order from `ids`; extra ids are ignored
    #[must_use]
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut slots: [String; SLATE_SIZE] = Default::default();
        for (slot, id) in slots.iter_mut().zip(ids) {
            *slot = id.into();
        }
        Self(slots)
    }

    /// Short ids of `winners` in rank order
    ///
    /// # Errors
    /// Returns error if a winner's ledger entry cannot be built
    pub fn from_winners(winners: &[OraclePriceRecord]) -> Result<Self, RecordError> {
        let ids = winners
            .iter()
            .take(SLATE_SIZE)
            .map(OraclePriceRecord::short_id)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_ids(ids))
    }

    /// Slots in rank order
    #[must_use]
    pub const fn slots(&self) -> &[String; SLATE_SIZE] {
        &self.0
    }

    /// Number of non-empty slots
    #[must_use]
    pub fn filled(&self) -> usize {
        self.0.iter().filter(|s| !s.is_empty()).count()
    }

    /// Whether every slot is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filled() == 0
    }

    /// Take the slot array
    #[must_use]
    pub fn into_slots(self) -> [String; SLATE_SIZE] {
        self.0
    }
}

impl fmt::Display for Slate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            writeln!(f, "{:>32} {:2}, {}", "", i + 1, id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_slate_is_padded() {
        let slate = Slate::from_ids(["aa", "bb"]);
        assert_eq!(slate.slots().len(), SLATE_SIZE);
        assert_eq!(slate.filled(), 2);
        assert_eq!(slate.slots()[0], "aa");
        assert!(slate.slots()[2..].iter().all(String::is_empty));
    }

    #[test]
    fn test_overlong_input_truncated() {
        let ids: Vec<String> = (0..15).map(|i| format!("{i:016x}")).collect();
        let slate = Slate::from_ids(ids);
        assert_eq!(slate.filled(), SLATE_SIZE);
    }

    #[test]
    fn test_serializes_as_array() {
        let json = serde_json::to_string(&Slate::empty()).unwrap();
        assert_eq!(json, format!("[{}]", vec!["\"\""; SLATE_SIZE].join(",")));
        assert!(Slate::empty().is_empty());
    }
}
