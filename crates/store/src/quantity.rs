//! Authoritative on-hand quantity storage.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use partsledger_core::{ExpectedRevision, LedgerResult, Money, PartNumber, StoreId};
use partsledger_ledger::StockItem;

/// Conditional, row-level storage for stock items.
///
/// The quantity store holds the **authoritative** on-hand state, one row per
/// (store, part number). Only the reconciliation engine writes to it; every
/// other component reads.
///
/// ## Conditional Updates
///
/// `apply_delta()` carries an [`ExpectedRevision`]. Implementations must
/// apply the delta only if the row still holds that revision, bumping it on
/// success. Two concurrent writers can therefore never both act on the same
/// starting quantity: the loser observes `Conflict`, re-reads, and retries.
///
/// ## Non-negativity
///
/// `apply_delta()` must reject (never clamp) a delta that would drive
/// `quantity_on_hand` below zero, reporting the shortage as
/// `InsufficientStock { available, requested }`.
///
/// ## Implementation Requirements
///
/// Implementations must:
/// - make `apply_delta` atomic (check + update as one step)
/// - enforce the revision check and the non-negativity guard in that step
/// - bump `revision` and stamp `last_updated` on every successful mutation
/// - keep rows forever: deactivation via `set_active`, never deletion
pub trait QuantityStore: Send + Sync {
    /// Current row for an item. `NotFound` if never provisioned.
    fn get(&self, store_id: &StoreId, part_number: &PartNumber) -> LedgerResult<StockItem>;

    /// Atomically apply a signed delta to the on-hand quantity.
    ///
    /// Fails `NotFound` for unknown items, `Conflict` when
    /// `expected_revision` is stale, and `InsufficientStock` when the delta
    /// would drive the quantity negative. Returns the updated row.
    fn apply_delta(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        delta: i64,
        expected_revision: ExpectedRevision,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockItem>;

    /// Create a fresh row. `Conflict` if the item already exists.
    fn provision(&self, item: StockItem) -> LedgerResult<StockItem>;

    /// Soft-delete or reactivate an item. `NotFound` for unknown items.
    fn set_active(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        active: bool,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockItem>;

    /// All rows for one store, ordered by part number.
    fn list(&self, store_id: &StoreId) -> LedgerResult<Vec<StockItem>>;

    /// Refresh `cost_price` from an inbound receipt (latest-receipt costing).
    fn record_cost(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        cost_price: Money,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockItem>;
}

impl<S> QuantityStore for Arc<S>
where
    S: QuantityStore + ?Sized,
{
    fn get(&self, store_id: &StoreId, part_number: &PartNumber) -> LedgerResult<StockItem> {
        (**self).get(store_id, part_number)
    }

    fn apply_delta(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        delta: i64,
        expected_revision: ExpectedRevision,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockItem> {
        (**self).apply_delta(store_id, part_number, delta, expected_revision, now)
    }

    fn provision(&self, item: StockItem) -> LedgerResult<StockItem> {
        (**self).provision(item)
    }

    fn set_active(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        active: bool,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockItem> {
        (**self).set_active(store_id, part_number, active, now)
    }

    fn list(&self, store_id: &StoreId) -> LedgerResult<Vec<StockItem>> {
        (**self).list(store_id)
    }

    fn record_cost(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        cost_price: Money,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockItem> {
        (**self).record_cost(store_id, part_number, cost_price, now)
    }
}
