//! Append-only movement history.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use partsledger_core::{LedgerResult, MovementId, PartNumber, ReferenceId, StoreId};
use partsledger_ledger::{Movement, UncommittedMovement};

/// Durable, append-only record of every reconciled movement.
///
/// The log keeps **both** applied and rejected movements: rejections are
/// audit evidence, they just never touch quantity. Entries are immutable
/// once recorded; corrections arrive as new compensating movements.
///
/// ## Sequences
///
/// `record()` assigns each movement its per-item `sequence` (1, 2, 3, ...),
/// giving every item's history a total order even when `applied_at`
/// timestamps collide.
///
/// ## Read Semantics
///
/// `list_by_item()` is finite and restartable: re-querying yields the same
/// entries (plus any recorded since), ordered by `applied_at` ascending with
/// `sequence` as the tiebreaker.
pub trait MovementLog: Send + Sync {
    /// Append one movement, assigning its per-item sequence.
    fn record(&self, movement: UncommittedMovement) -> LedgerResult<Movement>;

    /// Full history for one item, optionally bounded below by `since`
    /// (inclusive on `applied_at`).
    fn list_by_item(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        since: Option<DateTime<Utc>>,
    ) -> LedgerResult<Vec<Movement>>;

    /// Every movement recorded under a reference, across the store.
    /// Drives idempotency checks and order-line state folds.
    fn find_by_reference(
        &self,
        store_id: &StoreId,
        reference_id: &ReferenceId,
    ) -> LedgerResult<Vec<Movement>>;

    /// Single movement by id, `None` if unknown to this store.
    fn find_by_id(
        &self,
        store_id: &StoreId,
        movement_id: MovementId,
    ) -> LedgerResult<Option<Movement>>;

    /// The applied movement whose `reverses` links to the given id, if any.
    fn find_reversal(
        &self,
        store_id: &StoreId,
        movement_id: MovementId,
    ) -> LedgerResult<Option<Movement>>;
}

impl<L> MovementLog for Arc<L>
where
    L: MovementLog + ?Sized,
{
    fn record(&self, movement: UncommittedMovement) -> LedgerResult<Movement> {
        (**self).record(movement)
    }

    fn list_by_item(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        since: Option<DateTime<Utc>>,
    ) -> LedgerResult<Vec<Movement>> {
        (**self).list_by_item(store_id, part_number, since)
    }

    fn find_by_reference(
        &self,
        store_id: &StoreId,
        reference_id: &ReferenceId,
    ) -> LedgerResult<Vec<Movement>> {
        (**self).find_by_reference(store_id, reference_id)
    }

    fn find_by_id(
        &self,
        store_id: &StoreId,
        movement_id: MovementId,
    ) -> LedgerResult<Option<Movement>> {
        (**self).find_by_id(store_id, movement_id)
    }

    fn find_reversal(
        &self,
        store_id: &StoreId,
        movement_id: MovementId,
    ) -> LedgerResult<Option<Movement>> {
        (**self).find_reversal(store_id, movement_id)
    }
}
