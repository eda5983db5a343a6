//! Part numbers.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Manufacturer part number, unique within a store.
///
/// Normalized on construction: surrounding whitespace is trimmed and ASCII
/// letters are uppercased, so `"15400-raf-t01"` and `"15400-RAF-T01"`
/// address the same stock item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartNumber(String);

impl PartNumber {
    pub fn new(value: impl Into<String>) -> LedgerResult<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(LedgerError::invalid_movement("part number cannot be empty"));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PartNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PartNumber {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PartNumber {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PartNumber> for String {
    fn from(value: PartNumber) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        let a = PartNumber::new(" 15400-raf-t01 ").unwrap();
        let b = PartNumber::new("15400-RAF-T01").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "15400-RAF-T01");
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(
            PartNumber::new("  "),
            Err(LedgerError::InvalidMovement(_))
        ));
    }

    #[test]
    fn serde_round_trips_through_normalization() {
        let part: PartNumber = serde_json::from_str("\"ngk-7090\"").unwrap();
        assert_eq!(part.as_str(), "NGK-7090");
        assert_eq!(serde_json::to_string(&part).unwrap(), "\"NGK-7090\"");
    }
}
