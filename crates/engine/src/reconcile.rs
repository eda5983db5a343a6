//! Movement reconciliation.
//!
//! `submit` runs the full pipeline for one movement request:
//!
//! 1. validate the request (sign/kind consistency, non-zero delta)
//! 2. check the movement log for an applied duplicate of the same
//!    `(reference, kind)` and return it unchanged if found
//! 3. take the per-item lock, bounded by the configured timeout
//! 4. repeat the duplicate check, since one may have landed while waiting
//! 5. apply the delta under the store's revision guard and record the
//!    outcome in the movement log
//!
//! Domain refusals (insufficient stock, unknown item on an outbound kind,
//! inactive item) are written to the log as `Rejected` before the error goes
//! back to the caller, so the audit trail shows the attempt. Transient
//! failures (`Conflict`, `Timeout`) are never logged; the caller retries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::instrument;

use partsledger_core::{
    ExpectedRevision, LedgerError, LedgerResult, Money, MovementId, PartNumber, ReferenceId,
    StoreId,
};
use partsledger_ledger::{
    Movement, MovementKind, MovementRequest, StockItem, StockSummary, UncommittedMovement,
    summarize,
};
use partsledger_store::{MovementLog, QuantityStore};

use crate::lock::KeyedLock;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long `submit` waits for another writer to release an item before
    /// giving up with `Timeout`.
    pub lock_timeout: Duration,
    /// Revision-conflict retries before `Conflict` surfaces to the caller.
    /// Conflicts come from writers outside this process sharing the store.
    pub max_conflict_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            max_conflict_retries: 3,
        }
    }
}

/// The single write path into the ledger.
///
/// Generic over the quantity store and movement log so the same pipeline
/// runs against the in-memory pair in tests and Postgres in production.
pub struct ReconciliationEngine<Q, L> {
    quantities: Q,
    movements: L,
    locks: KeyedLock,
    config: EngineConfig,
}

impl<Q, L> ReconciliationEngine<Q, L>
where
    Q: QuantityStore,
    L: MovementLog,
{
    pub fn new(quantities: Q, movements: L) -> Self {
        Self::with_config(quantities, movements, EngineConfig::default())
    }

    pub fn with_config(quantities: Q, movements: L, config: EngineConfig) -> Self {
        Self {
            quantities,
            movements,
            locks: KeyedLock::new(),
            config,
        }
    }

    /// Reconcile one movement request against the ledger.
    ///
    /// Returns the recorded movement: freshly applied, or the original when
    /// the request turns out to be a duplicate. Errors carry the refusal.
    #[instrument(
        skip(self, request),
        fields(
            store_id = %request.store_id,
            part_number = %request.part_number,
            kind = %request.kind,
            reference_id = %request.reference_id,
            delta = request.quantity_delta
        ),
        err
    )]
    pub fn submit(&self, request: MovementRequest) -> LedgerResult<Movement> {
        request.validate()?;

        // Cheap pre-check; the one under the lock is authoritative.
        if let Some(original) = self.find_applied_duplicate(&request)? {
            return Ok(original);
        }

        let _guard = self.locks.acquire(&request.key(), self.config.lock_timeout)?;

        if let Some(original) = self.find_applied_duplicate(&request)? {
            return Ok(original);
        }

        self.apply_under_lock(&request, None)
    }

    /// Undo an applied movement with a compensating one.
    ///
    /// The compensating movement flips the delta and maps the kind to its
    /// opposite stock direction (an undone sale comes back as a `Return`).
    /// Reversing twice fails with `AlreadyReversed`; reversing a rejected
    /// movement is refused outright.
    #[instrument(skip(self), fields(store_id = %store_id, movement_id = %movement_id), err)]
    pub fn reverse(&self, store_id: &StoreId, movement_id: MovementId) -> LedgerResult<Movement> {
        self.reverse_as(store_id, movement_id, None)
    }

    /// Undo an applied movement, recording the compensation under a
    /// caller-chosen reference instead of the derived `rev:` one.
    ///
    /// Callers that fold a workflow's history out of one reference use this
    /// so the compensation shows up there. The one-reversal-per-movement
    /// gate is the same as [`reverse`](Self::reverse)'s, whichever form the
    /// competing callers use.
    #[instrument(
        skip(self),
        fields(store_id = %store_id, movement_id = %movement_id, reference_id = %reference_id),
        err
    )]
    pub fn reverse_under(
        &self,
        store_id: &StoreId,
        movement_id: MovementId,
        reference_id: ReferenceId,
    ) -> LedgerResult<Movement> {
        self.reverse_as(store_id, movement_id, Some(reference_id))
    }

    fn reverse_as(
        &self,
        store_id: &StoreId,
        movement_id: MovementId,
        reference_id: Option<ReferenceId>,
    ) -> LedgerResult<Movement> {
        let original = self
            .movements
            .find_by_id(store_id, movement_id)?
            .ok_or(LedgerError::NotFound)?;

        if !original.is_applied() {
            return Err(LedgerError::invalid_movement(format!(
                "movement {movement_id} was rejected and cannot be reversed"
            )));
        }
        if self.movements.find_reversal(store_id, movement_id)?.is_some() {
            return Err(LedgerError::AlreadyReversed(movement_id));
        }

        let mut request = MovementRequest::new(
            original.store_id.clone(),
            original.part_number.clone(),
            original.kind.reversal(),
            -original.quantity_delta,
            reference_id.unwrap_or_else(|| ReferenceId::for_reversal(movement_id)),
        );
        request.unit_price = original.unit_price;
        request.counterparty = original.counterparty.clone();
        // Holds by construction: the reversal flips both the kind's
        // direction and the delta's sign.
        request.validate()?;

        let _guard = self.locks.acquire(&original.key(), self.config.lock_timeout)?;

        // A concurrent reversal may have landed while we waited.
        if self.movements.find_reversal(store_id, movement_id)?.is_some() {
            return Err(LedgerError::AlreadyReversed(movement_id));
        }

        self.apply_under_lock(&request, Some(movement_id))
    }

    /// Create an empty stock row ahead of its first movement.
    pub fn provision_item(
        &self,
        store_id: StoreId,
        part_number: PartNumber,
        cost_price: Money,
        sell_price: Money,
    ) -> LedgerResult<StockItem> {
        self.quantities.provision(StockItem::provisioned(
            store_id,
            part_number,
            cost_price,
            sell_price,
            Utc::now(),
        ))
    }

    /// Soft-delete or restore an item. History stays either way.
    pub fn set_item_active(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        active: bool,
    ) -> LedgerResult<StockItem> {
        self.quantities
            .set_active(store_id, part_number, active, Utc::now())
    }

    pub fn item(&self, store_id: &StoreId, part_number: &PartNumber) -> LedgerResult<StockItem> {
        self.quantities.get(store_id, part_number)
    }

    pub fn list_items(&self, store_id: &StoreId) -> LedgerResult<Vec<StockItem>> {
        self.quantities.list(store_id)
    }

    /// Valuation roll-up over the store's active items.
    pub fn stock_summary(&self, store_id: &StoreId) -> LedgerResult<StockSummary> {
        let items = self.quantities.list(store_id)?;
        summarize(&items)
    }

    /// Movement history for one item, oldest first.
    pub fn item_history(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        since: Option<DateTime<Utc>>,
    ) -> LedgerResult<Vec<Movement>> {
        self.movements.list_by_item(store_id, part_number, since)
    }

    /// All movements recorded under one reference.
    pub fn movements_for_reference(
        &self,
        store_id: &StoreId,
        reference_id: &ReferenceId,
    ) -> LedgerResult<Vec<Movement>> {
        self.movements.find_by_reference(store_id, reference_id)
    }

    pub fn movement(
        &self,
        store_id: &StoreId,
        movement_id: MovementId,
    ) -> LedgerResult<Option<Movement>> {
        self.movements.find_by_id(store_id, movement_id)
    }

    /// The applied movement compensating `movement_id`, if one exists.
    pub fn reversal_of(
        &self,
        store_id: &StoreId,
        movement_id: MovementId,
    ) -> LedgerResult<Option<Movement>> {
        self.movements.find_reversal(store_id, movement_id)
    }

    /// Applied movement matching the request's idempotency key, if any.
    ///
    /// The key is `(reference, kind)` for the same part; rejected movements
    /// never count, so a refused request may be retried under its reference.
    fn find_applied_duplicate(&self, request: &MovementRequest) -> LedgerResult<Option<Movement>> {
        let history = self
            .movements
            .find_by_reference(&request.store_id, &request.reference_id)?;
        for movement in history {
            if movement.is_applied()
                && movement.kind == request.kind
                && movement.part_number == request.part_number
            {
                if movement.quantity_delta != request.quantity_delta {
                    tracing::warn!(
                        reference_id = %request.reference_id,
                        original_delta = movement.quantity_delta,
                        requested_delta = request.quantity_delta,
                        "duplicate reference resubmitted with a different delta, returning the original"
                    );
                }
                return Ok(Some(movement));
            }
        }
        Ok(None)
    }

    /// Apply + record. Caller holds the item lock.
    fn apply_under_lock(
        &self,
        request: &MovementRequest,
        reverses: Option<MovementId>,
    ) -> LedgerResult<Movement> {
        let now = Utc::now();
        let applied_item = self.apply_with_retries(request, now)?;

        // Latest-receipt costing: a priced inbound receipt refreshes the
        // item's cost going forward. Historical movements keep the price
        // they were recorded with.
        if request.kind == MovementKind::In {
            if let Some(price) = request.unit_price {
                self.quantities
                    .record_cost(&request.store_id, &request.part_number, price, now)?;
            }
        }

        let mut movement =
            UncommittedMovement::applied(request, applied_item.quantity_on_hand, now);
        if let Some(original) = reverses {
            movement = movement.with_reverses(original);
        }
        let recorded = self.movements.record(movement)?;
        tracing::debug!(
            movement_id = %recorded.id,
            quantity_after = applied_item.quantity_on_hand,
            "movement applied"
        );
        Ok(recorded)
    }

    /// Run the conditional update, re-reading on revision conflicts.
    fn apply_with_retries(
        &self,
        request: &MovementRequest,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockItem> {
        let mut attempt = 0u32;
        loop {
            let item = self.current_item(request, now)?;

            if !item.active {
                let error = LedgerError::invalid_movement(format!(
                    "item {} is inactive",
                    item.key()
                ));
                self.record_rejection(request, error.to_string(), now);
                return Err(error);
            }

            match self.quantities.apply_delta(
                &request.store_id,
                &request.part_number,
                request.quantity_delta,
                ExpectedRevision::Exact(item.revision),
                now,
            ) {
                Ok(updated) => return Ok(updated),
                Err(error @ LedgerError::InsufficientStock { .. }) => {
                    self.record_rejection(request, error.to_string(), now);
                    return Err(error);
                }
                Err(LedgerError::Conflict(message)) => {
                    if attempt >= self.config.max_conflict_retries {
                        return Err(LedgerError::Conflict(message));
                    }
                    attempt += 1;
                    tracing::debug!(attempt, %message, "revision conflict, re-reading");
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Current row for the request's item. A first `In` provisions the row;
    /// any other kind against an unknown item is rejected and logged.
    fn current_item(
        &self,
        request: &MovementRequest,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockItem> {
        match self.quantities.get(&request.store_id, &request.part_number) {
            Ok(item) => Ok(item),
            Err(LedgerError::NotFound) if request.kind == MovementKind::In => {
                let fresh = StockItem::provisioned(
                    request.store_id.clone(),
                    request.part_number.clone(),
                    Money::ZERO,
                    Money::ZERO,
                    now,
                );
                match self.quantities.provision(fresh) {
                    Ok(item) => Ok(item),
                    // Lost a provision race; the row exists now.
                    Err(LedgerError::Conflict(_)) => {
                        self.quantities.get(&request.store_id, &request.part_number)
                    }
                    Err(other) => Err(other),
                }
            }
            Err(LedgerError::NotFound) => {
                self.record_rejection(request, LedgerError::NotFound.to_string(), now);
                Err(LedgerError::NotFound)
            }
            Err(other) => Err(other),
        }
    }

    /// Best-effort audit entry for a refused request. A log failure here
    /// must not mask the refusal itself.
    fn record_rejection(&self, request: &MovementRequest, reason: String, now: DateTime<Utc>) {
        let movement = UncommittedMovement::rejected(request, reason, now);
        if let Err(error) = self.movements.record(movement) {
            tracing::error!(%error, reference_id = %request.reference_id, "failed to record rejected movement");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partsledger_store::{InMemoryMovementLog, InMemoryQuantityStore};

    fn test_engine() -> ReconciliationEngine<InMemoryQuantityStore, InMemoryMovementLog> {
        ReconciliationEngine::new(InMemoryQuantityStore::new(), InMemoryMovementLog::new())
    }

    fn test_store_id() -> StoreId {
        StoreId::new("mjm").unwrap()
    }

    fn test_part() -> PartNumber {
        PartNumber::new("15400-RAF-T01").unwrap()
    }

    fn receipt(delta: i64, reference: &str) -> MovementRequest {
        MovementRequest::new(
            test_store_id(),
            test_part(),
            MovementKind::In,
            delta,
            ReferenceId::new(reference).unwrap(),
        )
    }

    #[test]
    fn invalid_requests_never_reach_the_stores() {
        let engine = test_engine();
        let zero = receipt(1, "po-1");
        let zero = MovementRequest {
            quantity_delta: 0,
            ..zero
        };

        assert!(engine.submit(zero).is_err());
        // Nothing was provisioned and nothing was logged.
        assert!(matches!(
            engine.item(&test_store_id(), &test_part()),
            Err(LedgerError::NotFound)
        ));
        assert!(
            engine
                .item_history(&test_store_id(), &test_part(), None)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn first_receipt_provisions_the_item() {
        let engine = test_engine();
        let movement = engine
            .submit(receipt(20, "po-1").with_unit_price(Money::from_minor_units(450).unwrap()))
            .unwrap();

        assert_eq!(movement.quantity_after, Some(20));
        let item = engine.item(&test_store_id(), &test_part()).unwrap();
        assert_eq!(item.quantity_on_hand, 20);
        assert_eq!(item.cost_price.minor_units(), 450);
        assert!(item.active);
    }

    #[test]
    fn outbound_against_an_unknown_item_is_logged_and_refused() {
        let engine = test_engine();
        let request = MovementRequest::new(
            test_store_id(),
            test_part(),
            MovementKind::Out,
            -3,
            ReferenceId::new("order-1").unwrap(),
        );

        match engine.submit(request) {
            Err(LedgerError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }

        let history = engine
            .item_history(&test_store_id(), &test_part(), None)
            .unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].is_applied());
        assert_eq!(
            history[0].status.reject_reason(),
            Some("stock item not found")
        );
    }

    #[test]
    fn inactive_items_refuse_new_movements() {
        let engine = test_engine();
        engine.submit(receipt(5, "po-1")).unwrap();
        engine
            .set_item_active(&test_store_id(), &test_part(), false)
            .unwrap();

        let err = engine.submit(receipt(5, "po-2")).unwrap_err();
        match err {
            LedgerError::InvalidMovement(msg) if msg.contains("inactive") => {}
            other => panic!("expected inactive refusal, got {other:?}"),
        }

        // Quantity is untouched and the refusal is on record.
        let item = engine.item(&test_store_id(), &test_part()).unwrap();
        assert_eq!(item.quantity_on_hand, 5);
        let history = engine
            .item_history(&test_store_id(), &test_part(), None)
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[1].is_applied());
    }

    #[test]
    fn summary_reflects_priced_receipts() {
        let engine = test_engine();
        engine
            .submit(receipt(10, "po-1").with_unit_price(Money::from_minor_units(450).unwrap()))
            .unwrap();

        let summary = engine.stock_summary(&test_store_id()).unwrap();
        assert_eq!(summary.parts, 1);
        assert_eq!(summary.units_on_hand, 10);
        assert_eq!(summary.cost_value.minor_units(), 4500);
    }
}
