//! Optimistic concurrency expectation for stock item rows.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Revision expectation for a conditional stock update.
///
/// Stores apply a delta only if the row still carries the expected revision;
/// a concurrent writer bumps it first and the loser observes
/// [`LedgerError::Conflict`], re-reads, and retries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedRevision {
    /// Skip the revision check (the store still serializes the write itself).
    Any,
    /// Require the row to be at an exact revision.
    Exact(u64),
}

impl ExpectedRevision {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedRevision::Any => true,
            ExpectedRevision::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> LedgerResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(LedgerError::conflict(format!(
                "revision check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_always_matches() {
        assert!(ExpectedRevision::Any.matches(0));
        assert!(ExpectedRevision::Any.matches(42));
    }

    #[test]
    fn exact_matches_only_its_revision() {
        assert!(ExpectedRevision::Exact(3).check(3).is_ok());
        assert!(matches!(
            ExpectedRevision::Exact(3).check(4),
            Err(LedgerError::Conflict(_))
        ));
    }
}
