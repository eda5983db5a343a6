//! Strongly-typed identifiers used across the ledger.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::part::PartNumber;

/// Identifier of a single movement record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(Uuid);

impl MovementId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
    /// for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MovementId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for MovementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for MovementId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<MovementId> for Uuid {
    fn from(value: MovementId) -> Self {
        value.0
    }
}

impl FromStr for MovementId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|e| LedgerError::invalid_movement(format!("MovementId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Opaque store tag scoping every stock item and movement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoreId(String);

/// Caller-supplied link to the originating order/shipment/manual entry.
///
/// Doubles as the idempotency key: a resubmitted (reference, kind) pair is
/// applied at most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReferenceId(String);

impl ReferenceId {
    /// Reference carried by compensating movements: `"rev:<original id>"`.
    pub fn for_reversal(original: MovementId) -> Self {
        Self(format!("rev:{original}"))
    }
}

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create from a raw string. Trims surrounding whitespace and
            /// rejects the empty string.
            pub fn new(value: impl Into<String>) -> LedgerResult<Self> {
                let value = value.into();
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(LedgerError::invalid_movement(concat!(
                        $name,
                        " cannot be empty"
                    )));
                }
                Ok(Self(trimmed.to_owned()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = LedgerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $t {
            type Error = LedgerError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

impl_string_newtype!(StoreId, "store id");
impl_string_newtype!(ReferenceId, "reference id");

/// Composite key addressing one stock item: (store, part number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub store_id: StoreId,
    pub part_number: PartNumber,
}

impl ItemKey {
    pub fn new(store_id: StoreId, part_number: PartNumber) -> Self {
        Self {
            store_id,
            part_number,
        }
    }
}

impl core::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.store_id, self.part_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_id_trims_and_rejects_empty() {
        let id = StoreId::new("  mjm ").unwrap();
        assert_eq!(id.as_str(), "mjm");
        assert!(StoreId::new("   ").is_err());
    }

    #[test]
    fn reversal_reference_embeds_the_original_id() {
        let id = MovementId::new();
        let reference = ReferenceId::for_reversal(id);
        assert_eq!(reference.as_str(), format!("rev:{id}"));
    }

    #[test]
    fn movement_id_serde_is_transparent() {
        let id = MovementId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: MovementId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
