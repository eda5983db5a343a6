//! In-memory store implementations, for tests/dev. Not optimized for
//! performance.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use partsledger_core::{
    ExpectedRevision, ItemKey, LedgerError, LedgerResult, Money, MovementId, PartNumber,
    ReferenceId, StoreId,
};
use partsledger_ledger::{Movement, StockItem, UncommittedMovement};

use crate::movement_log::MovementLog;
use crate::quantity::QuantityStore;
use crate::query::{MovementFilter, MovementPage, MovementQuery, Pagination};

/// In-memory quantity store.
#[derive(Debug, Default)]
pub struct InMemoryQuantityStore {
    items: RwLock<HashMap<ItemKey, StockItem>>,
}

impl InMemoryQuantityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QuantityStore for InMemoryQuantityStore {
    fn get(&self, store_id: &StoreId, part_number: &PartNumber) -> LedgerResult<StockItem> {
        let items = self
            .items
            .read()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;
        items
            .get(&ItemKey::new(store_id.clone(), part_number.clone()))
            .cloned()
            .ok_or(LedgerError::NotFound)
    }

    fn apply_delta(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        delta: i64,
        expected_revision: ExpectedRevision,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockItem> {
        let key = ItemKey::new(store_id.clone(), part_number.clone());
        let mut items = self
            .items
            .write()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;

        let item = items.get(&key).ok_or(LedgerError::NotFound)?;
        expected_revision.check(item.revision)?;
        let updated = item.with_delta(delta, now)?;

        items.insert(key, updated.clone());
        Ok(updated)
    }

    fn provision(&self, item: StockItem) -> LedgerResult<StockItem> {
        let key = item.key();
        let mut items = self
            .items
            .write()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;

        if items.contains_key(&key) {
            return Err(LedgerError::conflict(format!(
                "item {key} already provisioned"
            )));
        }

        items.insert(key, item.clone());
        Ok(item)
    }

    fn set_active(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        active: bool,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockItem> {
        let key = ItemKey::new(store_id.clone(), part_number.clone());
        let mut items = self
            .items
            .write()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;

        let item = items.get(&key).ok_or(LedgerError::NotFound)?;
        let updated = item.with_active(active, now);

        items.insert(key, updated.clone());
        Ok(updated)
    }

    fn list(&self, store_id: &StoreId) -> LedgerResult<Vec<StockItem>> {
        let items = self
            .items
            .read()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;

        let mut rows: Vec<StockItem> = items
            .values()
            .filter(|item| item.store_id == *store_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.part_number.cmp(&b.part_number));
        Ok(rows)
    }

    fn record_cost(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        cost_price: Money,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockItem> {
        let key = ItemKey::new(store_id.clone(), part_number.clone());
        let mut items = self
            .items
            .write()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;

        let item = items.get(&key).ok_or(LedgerError::NotFound)?;
        let updated = item.with_cost(cost_price, now);

        items.insert(key, updated.clone());
        Ok(updated)
    }
}

/// In-memory append-only movement log.
#[derive(Debug, Default)]
pub struct InMemoryMovementLog {
    histories: RwLock<HashMap<ItemKey, Vec<Movement>>>,
}

impl InMemoryMovementLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_sequence(history: &[Movement]) -> u64 {
        history.last().map(|m| m.sequence).unwrap_or(0) + 1
    }
}

fn history_order(a: &Movement, b: &Movement) -> core::cmp::Ordering {
    a.applied_at
        .cmp(&b.applied_at)
        .then(a.sequence.cmp(&b.sequence))
}

impl MovementLog for InMemoryMovementLog {
    fn record(&self, movement: UncommittedMovement) -> LedgerResult<Movement> {
        let key = ItemKey::new(movement.store_id.clone(), movement.part_number.clone());
        let mut histories = self
            .histories
            .write()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;

        let history = histories.entry(key).or_default();
        let committed = movement.committed(Self::next_sequence(history));
        history.push(committed.clone());
        Ok(committed)
    }

    fn list_by_item(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        since: Option<DateTime<Utc>>,
    ) -> LedgerResult<Vec<Movement>> {
        let key = ItemKey::new(store_id.clone(), part_number.clone());
        let histories = self
            .histories
            .read()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;

        let mut movements: Vec<Movement> = histories
            .get(&key)
            .map(|history| {
                history
                    .iter()
                    .filter(|m| since.is_none_or(|cutoff| m.applied_at >= cutoff))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        movements.sort_by(history_order);
        Ok(movements)
    }

    fn find_by_reference(
        &self,
        store_id: &StoreId,
        reference_id: &ReferenceId,
    ) -> LedgerResult<Vec<Movement>> {
        let histories = self
            .histories
            .read()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;

        let mut movements: Vec<Movement> = histories
            .iter()
            .filter(|(key, _)| key.store_id == *store_id)
            .flat_map(|(_, history)| history.iter())
            .filter(|m| m.reference_id == *reference_id)
            .cloned()
            .collect();
        movements.sort_by(history_order);
        Ok(movements)
    }

    fn find_by_id(
        &self,
        store_id: &StoreId,
        movement_id: MovementId,
    ) -> LedgerResult<Option<Movement>> {
        let histories = self
            .histories
            .read()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;

        Ok(histories
            .iter()
            .filter(|(key, _)| key.store_id == *store_id)
            .flat_map(|(_, history)| history.iter())
            .find(|m| m.id == movement_id)
            .cloned())
    }

    fn find_reversal(
        &self,
        store_id: &StoreId,
        movement_id: MovementId,
    ) -> LedgerResult<Option<Movement>> {
        let histories = self
            .histories
            .read()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;

        Ok(histories
            .iter()
            .filter(|(key, _)| key.store_id == *store_id)
            .flat_map(|(_, history)| history.iter())
            .find(|m| m.reverses == Some(movement_id) && m.is_applied())
            .cloned())
    }
}

fn filter_matches(filter: &MovementFilter, movement: &Movement) -> bool {
    if let Some(part) = &filter.part_number {
        if movement.part_number != *part {
            return false;
        }
    }
    if let Some(kind) = filter.kind {
        if movement.kind != kind {
            return false;
        }
    }
    if let Some(reference) = &filter.reference_id {
        if movement.reference_id != *reference {
            return false;
        }
    }
    if filter.applied_only && !movement.is_applied() {
        return false;
    }
    if let Some(after) = filter.applied_after {
        if movement.applied_at < after {
            return false;
        }
    }
    if let Some(before) = filter.applied_before {
        if movement.applied_at > before {
            return false;
        }
    }
    true
}

#[async_trait]
impl MovementQuery for InMemoryMovementLog {
    async fn query_movements(
        &self,
        store_id: StoreId,
        filter: MovementFilter,
        pagination: Pagination,
    ) -> LedgerResult<MovementPage> {
        let histories = self
            .histories
            .read()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;

        let mut matches: Vec<Movement> = histories
            .iter()
            .filter(|(key, _)| key.store_id == store_id)
            .flat_map(|(_, history)| history.iter())
            .filter(|m| filter_matches(&filter, m))
            .cloned()
            .collect();
        drop(histories);

        // Newest first.
        matches.sort_by(|a, b| history_order(b, a));

        let total = matches.len() as u64;
        let movements: Vec<Movement> = matches
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .collect();
        let has_more = total > u64::from(pagination.offset + pagination.limit);

        Ok(MovementPage {
            movements,
            total,
            pagination,
            has_more,
        })
    }

    async fn get_movement(
        &self,
        store_id: StoreId,
        movement_id: MovementId,
    ) -> LedgerResult<Option<Movement>> {
        self.find_by_id(&store_id, movement_id)
    }
}
