//! Ledger error model.

use core::time::Duration;

use thiserror::Error;

use crate::id::MovementId;

/// Result type used across the ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-level error.
///
/// Keep this focused on deterministic stock/movement failures (validation,
/// shortages, conflicts). Backend faults are carried as [`LedgerError::Storage`]
/// so callers can tell a business rejection from a broken store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The (store, part number) pair has never been provisioned.
    #[error("stock item not found")]
    NotFound,

    /// A movement request or ledger input failed validation (sign/kind
    /// mismatch, zero delta, empty reference, deactivated item).
    #[error("invalid movement: {0}")]
    InvalidMovement(String),

    /// Applying the delta would drive the on-hand quantity negative.
    /// Quantities are rejected, never clamped.
    #[error("insufficient stock: available {available}, requested {requested}")]
    InsufficientStock { available: i64, requested: i64 },

    /// A conditional update lost against a concurrent writer (stale revision).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Per-item serialization could not be acquired within the bound.
    #[error("timed out after {waited:?} waiting for item lock")]
    Timeout { waited: Duration },

    /// The movement already has an applied compensating movement.
    #[error("movement {0} already reversed")]
    AlreadyReversed(MovementId),

    /// A line-item state change the reservation lifecycle does not allow.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// A scanned shipment line is missing required fields.
    #[error("incomplete line item: {0}")]
    IncompleteLineItem(String),

    /// Backend fault (poisoned lock, SQL/driver error). Not part of the
    /// domain taxonomy.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn invalid_movement(msg: impl Into<String>) -> Self {
        Self::InvalidMovement(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn incomplete_line(msg: impl Into<String>) -> Self {
        Self::IncompleteLineItem(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// True when resubmitting the same request may succeed: the caller lost
    /// a race (stale revision) or a lock wait expired.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Timeout { .. })
    }
}
