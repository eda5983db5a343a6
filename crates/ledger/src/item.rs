use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use partsledger_core::{ItemKey, LedgerError, LedgerResult, Money, PartNumber, StoreId};

/// One part number's authoritative state within a store.
///
/// Mutated only through the reconciliation engine; everyone else reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    pub store_id: StoreId,
    pub part_number: PartNumber,
    /// Never negative. A movement that would drive it below zero is
    /// rejected, not clamped.
    pub quantity_on_hand: i64,
    /// Latest receipt cost, minor units.
    pub cost_price: Money,
    pub sell_price: Money,
    /// Bumped on every successful mutation; drives conditional updates.
    pub revision: u64,
    /// Deactivated items keep their movement history but refuse new
    /// movements. Items are never deleted.
    pub active: bool,
    pub last_updated: DateTime<Utc>,
}

impl StockItem {
    /// Fresh row at quantity zero, revision zero.
    pub fn provisioned(
        store_id: StoreId,
        part_number: PartNumber,
        cost_price: Money,
        sell_price: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            store_id,
            part_number,
            quantity_on_hand: 0,
            cost_price,
            sell_price,
            revision: 0,
            active: true,
            last_updated: now,
        }
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.store_id.clone(), self.part_number.clone())
    }

    /// Row after applying `delta`: quantity adjusted, revision bumped,
    /// `last_updated` stamped. Fails `InsufficientStock` instead of clamping.
    pub fn with_delta(&self, delta: i64, now: DateTime<Utc>) -> LedgerResult<Self> {
        let next = self.quantity_on_hand + delta;
        if next < 0 {
            return Err(LedgerError::InsufficientStock {
                available: self.quantity_on_hand,
                requested: delta.abs(),
            });
        }
        Ok(Self {
            quantity_on_hand: next,
            revision: self.revision + 1,
            last_updated: now,
            ..self.clone()
        })
    }

    /// Row with `cost_price` refreshed from an inbound receipt.
    pub fn with_cost(&self, cost_price: Money, now: DateTime<Utc>) -> Self {
        Self {
            cost_price,
            revision: self.revision + 1,
            last_updated: now,
            ..self.clone()
        }
    }

    /// Row with the soft-delete flag set.
    pub fn with_active(&self, active: bool, now: DateTime<Utc>) -> Self {
        Self {
            active,
            revision: self.revision + 1,
            last_updated: now,
            ..self.clone()
        }
    }
}

/// Store-level valuation roll-up over active stock rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StockSummary {
    pub parts: usize,
    pub units_on_hand: i64,
    pub cost_value: Money,
    pub sell_value: Money,
}

/// Roll active items up into a valuation summary.
pub fn summarize<'a, I>(items: I) -> LedgerResult<StockSummary>
where
    I: IntoIterator<Item = &'a StockItem>,
{
    let mut summary = StockSummary::default();
    for item in items.into_iter().filter(|item| item.active) {
        summary.parts += 1;
        summary.units_on_hand += item.quantity_on_hand;
        summary.cost_value = summary
            .cost_value
            .plus(item.cost_price.times(item.quantity_on_hand)?)?;
        summary.sell_value = summary
            .sell_value
            .plus(item.sell_price.times(item.quantity_on_hand)?)?;
    }
    Ok(summary)
}
