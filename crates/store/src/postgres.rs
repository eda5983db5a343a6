//! Postgres-backed ledger storage.
//!
//! This module provides persistent [`QuantityStore`] and [`MovementLog`]
//! implementations over two tables. The conditional-update discipline and the
//! non-negativity guard are enforced at the database level, so the guarantees
//! hold across processes, not just across threads.
//!
//! ## Expected Schema
//!
//! ```sql
//! CREATE TABLE stock_items (
//!     store_id         TEXT        NOT NULL,
//!     part_number      TEXT        NOT NULL,
//!     quantity_on_hand BIGINT      NOT NULL CHECK (quantity_on_hand >= 0),
//!     cost_price       BIGINT      NOT NULL CHECK (cost_price >= 0),
//!     sell_price       BIGINT      NOT NULL CHECK (sell_price >= 0),
//!     revision         BIGINT      NOT NULL DEFAULT 0,
//!     active           BOOLEAN     NOT NULL DEFAULT TRUE,
//!     last_updated     TIMESTAMPTZ NOT NULL,
//!     PRIMARY KEY (store_id, part_number)
//! );
//!
//! CREATE TABLE movements (
//!     id             UUID        PRIMARY KEY,
//!     store_id       TEXT        NOT NULL,
//!     part_number    TEXT        NOT NULL,
//!     kind           TEXT        NOT NULL,
//!     quantity_delta BIGINT      NOT NULL,
//!     unit_price     BIGINT,
//!     counterparty   TEXT,
//!     reference_id   TEXT        NOT NULL,
//!     status         TEXT        NOT NULL,
//!     reject_reason  TEXT,
//!     quantity_after BIGINT,
//!     reverses       UUID,
//!     applied_at     TIMESTAMPTZ NOT NULL,
//!     sequence       BIGINT      NOT NULL,
//!     UNIQUE (store_id, part_number, sequence)
//! );
//!
//! CREATE INDEX movements_item_idx      ON movements (store_id, part_number, applied_at);
//! CREATE INDEX movements_reference_idx ON movements (store_id, reference_id);
//! CREATE INDEX movements_reverses_idx  ON movements (store_id, reverses);
//! ```
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to [`LedgerError`] as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError | Scenario |
//! |------------|----------------------|-------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Concurrent append or double provision |
//! | Database (check violation) | `23514` | `Storage` | Row data violates a table constraint |
//! | Database (other) | Any other | `Storage` | Other database errors |
//! | PoolClosed / RowNotFound / other | N/A | `Storage` | Pool shutdown, network failures, etc. |
//!
//! Domain outcomes (`NotFound`, `Conflict` on stale revision,
//! `InsufficientStock`) are derived from guarded statements, not from error
//! codes: a conditional `UPDATE` that matches no row is followed by one read
//! that tells the three cases apart.
//!
//! ## Thread Safety
//!
//! `PostgresLedgerStore` is `Send + Sync` and can be shared across threads.
//! All operations use the SQLx connection pool which handles thread-safe
//! connection management.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use partsledger_core::{
    ExpectedRevision, LedgerError, LedgerResult, Money, MovementId, PartNumber, ReferenceId,
    StoreId,
};
use partsledger_ledger::{Movement, MovementKind, MovementStatus, StockItem, UncommittedMovement};

use crate::movement_log::MovementLog;
use crate::quantity::QuantityStore;
use crate::query::{MovementFilter, MovementPage, MovementQuery, Pagination};

/// Postgres-backed quantity store + movement log.
///
/// One struct implements both storage traits so a single pool serves the
/// whole ledger. The conditional update in `apply_delta` and the per-item
/// `UNIQUE (store_id, part_number, sequence)` constraint carry the
/// concurrency guarantees even when several processes share the database.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Current row for an item.
    #[instrument(skip(self), fields(store_id = %store_id, part_number = %part_number), err)]
    pub async fn get_item(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
    ) -> LedgerResult<StockItem> {
        let row = sqlx::query(
            r#"
            SELECT
                store_id,
                part_number,
                quantity_on_hand,
                cost_price,
                sell_price,
                revision,
                active,
                last_updated
            FROM stock_items
            WHERE store_id = $1 AND part_number = $2
            "#,
        )
        .bind(store_id.as_str())
        .bind(part_number.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_item", e))?;

        match row {
            Some(row) => decode_item(&row),
            None => Err(LedgerError::NotFound),
        }
    }

    /// Atomically apply a delta under the revision and non-negativity guards.
    ///
    /// The `UPDATE` matches only when the row exists, still carries the
    /// expected revision, and would stay non-negative. When it matches
    /// nothing, a follow-up read tells `NotFound`, `Conflict`, and
    /// `InsufficientStock` apart.
    #[instrument(
        skip(self),
        fields(
            store_id = %store_id,
            part_number = %part_number,
            delta = delta,
            expected_revision = ?expected_revision
        ),
        err
    )]
    pub async fn apply_delta_checked(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        delta: i64,
        expected_revision: ExpectedRevision,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockItem> {
        let expected: Option<i64> = match expected_revision {
            ExpectedRevision::Any => None,
            ExpectedRevision::Exact(revision) => Some(revision as i64),
        };

        let row = sqlx::query(
            r#"
            UPDATE stock_items
            SET quantity_on_hand = quantity_on_hand + $3,
                revision = revision + 1,
                last_updated = $4
            WHERE store_id = $1
                AND part_number = $2
                AND ($5::bigint IS NULL OR revision = $5)
                AND quantity_on_hand + $3 >= 0
            RETURNING
                store_id,
                part_number,
                quantity_on_hand,
                cost_price,
                sell_price,
                revision,
                active,
                last_updated
            "#,
        )
        .bind(store_id.as_str())
        .bind(part_number.as_str())
        .bind(delta)
        .bind(now)
        .bind(expected)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("apply_delta", e))?;

        match row {
            Some(row) => decode_item(&row),
            None => {
                // Guard rejected the update; read the row to tell why. The
                // read races later writers, but the engine retries Conflict
                // either way.
                let current = self.get_item(store_id, part_number).await?;
                expected_revision.check(current.revision)?;
                Err(LedgerError::InsufficientStock {
                    available: current.quantity_on_hand,
                    requested: delta.abs(),
                })
            }
        }
    }

    /// Insert a fresh row. `Conflict` if the item already exists.
    #[instrument(skip(self, item), fields(store_id = %item.store_id, part_number = %item.part_number), err)]
    pub async fn provision_item(&self, item: StockItem) -> LedgerResult<StockItem> {
        sqlx::query(
            r#"
            INSERT INTO stock_items (
                store_id,
                part_number,
                quantity_on_hand,
                cost_price,
                sell_price,
                revision,
                active,
                last_updated
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(item.store_id.as_str())
        .bind(item.part_number.as_str())
        .bind(item.quantity_on_hand)
        .bind(item.cost_price.minor_units())
        .bind(item.sell_price.minor_units())
        .bind(item.revision as i64)
        .bind(item.active)
        .bind(item.last_updated)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::conflict(format!("item {} already provisioned", item.key()))
            } else {
                map_sqlx_error("provision_item", e)
            }
        })?;

        Ok(item)
    }

    /// Flip the soft-delete flag. `NotFound` for unknown items.
    #[instrument(skip(self), fields(store_id = %store_id, part_number = %part_number, active = active), err)]
    pub async fn set_item_active(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        active: bool,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockItem> {
        let row = sqlx::query(
            r#"
            UPDATE stock_items
            SET active = $3,
                revision = revision + 1,
                last_updated = $4
            WHERE store_id = $1 AND part_number = $2
            RETURNING
                store_id,
                part_number,
                quantity_on_hand,
                cost_price,
                sell_price,
                revision,
                active,
                last_updated
            "#,
        )
        .bind(store_id.as_str())
        .bind(part_number.as_str())
        .bind(active)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_item_active", e))?;

        match row {
            Some(row) => decode_item(&row),
            None => Err(LedgerError::NotFound),
        }
    }

    /// All rows for one store, ordered by part number.
    #[instrument(skip(self), fields(store_id = %store_id), err)]
    pub async fn list_items(&self, store_id: &StoreId) -> LedgerResult<Vec<StockItem>> {
        let rows = sqlx::query(
            r#"
            SELECT
                store_id,
                part_number,
                quantity_on_hand,
                cost_price,
                sell_price,
                revision,
                active,
                last_updated
            FROM stock_items
            WHERE store_id = $1
            ORDER BY part_number ASC
            "#,
        )
        .bind(store_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_items", e))?;

        rows.iter().map(decode_item).collect()
    }

    /// Refresh `cost_price` from an inbound receipt.
    #[instrument(skip(self), fields(store_id = %store_id, part_number = %part_number), err)]
    pub async fn record_cost_price(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        cost_price: Money,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockItem> {
        let row = sqlx::query(
            r#"
            UPDATE stock_items
            SET cost_price = $3,
                revision = revision + 1,
                last_updated = $4
            WHERE store_id = $1 AND part_number = $2
            RETURNING
                store_id,
                part_number,
                quantity_on_hand,
                cost_price,
                sell_price,
                revision,
                active,
                last_updated
            "#,
        )
        .bind(store_id.as_str())
        .bind(part_number.as_str())
        .bind(cost_price.minor_units())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_cost_price", e))?;

        match row {
            Some(row) => decode_item(&row),
            None => Err(LedgerError::NotFound),
        }
    }

    /// Append one movement, assigning the next per-item sequence.
    ///
    /// Runs in a transaction: read `MAX(sequence)`, insert at the next slot.
    /// A concurrent appender for the same item trips the unique constraint
    /// and surfaces as `Conflict`.
    #[instrument(
        skip(self, movement),
        fields(
            store_id = %movement.store_id,
            part_number = %movement.part_number,
            kind = %movement.kind,
            reference_id = %movement.reference_id
        ),
        err
    )]
    pub async fn record_movement(&self, movement: UncommittedMovement) -> LedgerResult<Movement> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let sequence =
            next_item_sequence(&mut tx, &movement.store_id, &movement.part_number).await?;

        let (status, reject_reason) = match &movement.status {
            MovementStatus::Applied => ("applied", None),
            MovementStatus::Rejected(reason) => ("rejected", Some(reason.as_str())),
        };

        sqlx::query(
            r#"
            INSERT INTO movements (
                id,
                store_id,
                part_number,
                kind,
                quantity_delta,
                unit_price,
                counterparty,
                reference_id,
                status,
                reject_reason,
                quantity_after,
                reverses,
                applied_at,
                sequence
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(movement.id.as_uuid())
        .bind(movement.store_id.as_str())
        .bind(movement.part_number.as_str())
        .bind(movement.kind.as_str())
        .bind(movement.quantity_delta)
        .bind(movement.unit_price.map(|p| p.minor_units()))
        .bind(movement.counterparty.as_deref())
        .bind(movement.reference_id.as_str())
        .bind(status)
        .bind(reject_reason)
        .bind(movement.quantity_after)
        .bind(movement.reverses.map(Uuid::from))
        .bind(movement.applied_at)
        .bind(sequence as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::conflict(format!(
                    "concurrent append detected: sequence {sequence} already exists"
                ))
            } else {
                map_sqlx_error("insert_movement", e)
            }
        })?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(movement.committed(sequence))
    }

    /// History for one item, oldest first, optionally bounded by `since`.
    #[instrument(skip(self), fields(store_id = %store_id, part_number = %part_number), err)]
    pub async fn movements_for_item(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        since: Option<DateTime<Utc>>,
    ) -> LedgerResult<Vec<Movement>> {
        let rows = sqlx::query(
            r#"
            SELECT
                id,
                store_id,
                part_number,
                kind,
                quantity_delta,
                unit_price,
                counterparty,
                reference_id,
                status,
                reject_reason,
                quantity_after,
                reverses,
                applied_at,
                sequence
            FROM movements
            WHERE store_id = $1
                AND part_number = $2
                AND ($3::timestamptz IS NULL OR applied_at >= $3)
            ORDER BY applied_at ASC, sequence ASC
            "#,
        )
        .bind(store_id.as_str())
        .bind(part_number.as_str())
        .bind(since)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("movements_for_item", e))?;

        rows.iter().map(decode_movement).collect()
    }

    /// Movements recorded under a reference, across the store.
    #[instrument(skip(self), fields(store_id = %store_id, reference_id = %reference_id), err)]
    pub async fn movements_for_reference(
        &self,
        store_id: &StoreId,
        reference_id: &ReferenceId,
    ) -> LedgerResult<Vec<Movement>> {
        let rows = sqlx::query(
            r#"
            SELECT
                id,
                store_id,
                part_number,
                kind,
                quantity_delta,
                unit_price,
                counterparty,
                reference_id,
                status,
                reject_reason,
                quantity_after,
                reverses,
                applied_at,
                sequence
            FROM movements
            WHERE store_id = $1 AND reference_id = $2
            ORDER BY applied_at ASC, sequence ASC
            "#,
        )
        .bind(store_id.as_str())
        .bind(reference_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("movements_for_reference", e))?;

        rows.iter().map(decode_movement).collect()
    }

    /// Single movement by id.
    #[instrument(skip(self), fields(store_id = %store_id, movement_id = %movement_id), err)]
    pub async fn movement_by_id(
        &self,
        store_id: &StoreId,
        movement_id: MovementId,
    ) -> LedgerResult<Option<Movement>> {
        let row = sqlx::query(
            r#"
            SELECT
                id,
                store_id,
                part_number,
                kind,
                quantity_delta,
                unit_price,
                counterparty,
                reference_id,
                status,
                reject_reason,
                quantity_after,
                reverses,
                applied_at,
                sequence
            FROM movements
            WHERE store_id = $1 AND id = $2
            LIMIT 1
            "#,
        )
        .bind(store_id.as_str())
        .bind(movement_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("movement_by_id", e))?;

        row.as_ref().map(decode_movement).transpose()
    }

    /// The applied movement compensating `movement_id`, if one exists.
    #[instrument(skip(self), fields(store_id = %store_id, movement_id = %movement_id), err)]
    pub async fn reversal_of(
        &self,
        store_id: &StoreId,
        movement_id: MovementId,
    ) -> LedgerResult<Option<Movement>> {
        let row = sqlx::query(
            r#"
            SELECT
                id,
                store_id,
                part_number,
                kind,
                quantity_delta,
                unit_price,
                counterparty,
                reference_id,
                status,
                reject_reason,
                quantity_after,
                reverses,
                applied_at,
                sequence
            FROM movements
            WHERE store_id = $1 AND reverses = $2 AND status = 'applied'
            LIMIT 1
            "#,
        )
        .bind(store_id.as_str())
        .bind(movement_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reversal_of", e))?;

        row.as_ref().map(decode_movement).transpose()
    }
}

/// Next free sequence slot for an item, read inside the caller's transaction.
async fn next_item_sequence(
    tx: &mut Transaction<'_, Postgres>,
    store_id: &StoreId,
    part_number: &PartNumber,
) -> LedgerResult<u64> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(MAX(sequence), 0) AS current_sequence
        FROM movements
        WHERE store_id = $1 AND part_number = $2
        "#,
    )
    .bind(store_id.as_str())
    .bind(part_number.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("next_item_sequence", e))?;

    let current: i64 = row
        .try_get("current_sequence")
        .map_err(|e| LedgerError::storage(format!("failed to read current_sequence: {e}")))?;
    Ok(current as u64 + 1)
}

/// Map SQLx errors to LedgerError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation: a concurrent writer got there first.
                Some("23505") => LedgerError::conflict(msg),
                _ => LedgerError::storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            LedgerError::storage(format!("connection pool closed in {operation}"))
        }
        _ => LedgerError::storage(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct StockItemRow {
    store_id: String,
    part_number: String,
    quantity_on_hand: i64,
    cost_price: i64,
    sell_price: i64,
    revision: i64,
    active: bool,
    last_updated: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StockItemRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StockItemRow {
            store_id: row.try_get("store_id")?,
            part_number: row.try_get("part_number")?,
            quantity_on_hand: row.try_get("quantity_on_hand")?,
            cost_price: row.try_get("cost_price")?,
            sell_price: row.try_get("sell_price")?,
            revision: row.try_get("revision")?,
            active: row.try_get("active")?,
            last_updated: row.try_get("last_updated")?,
        })
    }
}

impl TryFrom<StockItemRow> for StockItem {
    type Error = LedgerError;

    fn try_from(row: StockItemRow) -> Result<Self, Self::Error> {
        Ok(StockItem {
            store_id: StoreId::new(row.store_id)?,
            part_number: PartNumber::new(row.part_number)?,
            quantity_on_hand: row.quantity_on_hand,
            cost_price: Money::from_minor_units(row.cost_price)?,
            sell_price: Money::from_minor_units(row.sell_price)?,
            revision: row.revision as u64,
            active: row.active,
            last_updated: row.last_updated,
        })
    }
}

fn decode_item(row: &sqlx::postgres::PgRow) -> LedgerResult<StockItem> {
    let item_row = StockItemRow::from_row(row)
        .map_err(|e| LedgerError::storage(format!("failed to deserialize stock item row: {e}")))?;
    StockItem::try_from(item_row)
        .map_err(|e| LedgerError::storage(format!("corrupt stock item row: {e}")))
}

#[derive(Debug)]
struct MovementRow {
    id: Uuid,
    store_id: String,
    part_number: String,
    kind: String,
    quantity_delta: i64,
    unit_price: Option<i64>,
    counterparty: Option<String>,
    reference_id: String,
    status: String,
    reject_reason: Option<String>,
    quantity_after: Option<i64>,
    reverses: Option<Uuid>,
    applied_at: DateTime<Utc>,
    sequence: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for MovementRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            store_id: row.try_get("store_id")?,
            part_number: row.try_get("part_number")?,
            kind: row.try_get("kind")?,
            quantity_delta: row.try_get("quantity_delta")?,
            unit_price: row.try_get("unit_price")?,
            counterparty: row.try_get("counterparty")?,
            reference_id: row.try_get("reference_id")?,
            status: row.try_get("status")?,
            reject_reason: row.try_get("reject_reason")?,
            quantity_after: row.try_get("quantity_after")?,
            reverses: row.try_get("reverses")?,
            applied_at: row.try_get("applied_at")?,
            sequence: row.try_get("sequence")?,
        })
    }
}

impl TryFrom<MovementRow> for Movement {
    type Error = LedgerError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let status = match row.status.as_str() {
            "applied" => MovementStatus::Applied,
            "rejected" => MovementStatus::Rejected(row.reject_reason.unwrap_or_default()),
            other => {
                return Err(LedgerError::storage(format!(
                    "invalid status in movement row: {other}"
                )));
            }
        };

        Ok(Movement {
            id: MovementId::from_uuid(row.id),
            store_id: StoreId::new(row.store_id)?,
            part_number: PartNumber::new(row.part_number)?,
            kind: row.kind.parse::<MovementKind>()?,
            quantity_delta: row.quantity_delta,
            unit_price: row.unit_price.map(Money::from_minor_units).transpose()?,
            counterparty: row.counterparty,
            reference_id: ReferenceId::new(row.reference_id)?,
            status,
            quantity_after: row.quantity_after,
            reverses: row.reverses.map(MovementId::from_uuid),
            applied_at: row.applied_at,
            sequence: row.sequence as u64,
        })
    }
}

fn decode_movement(row: &sqlx::postgres::PgRow) -> LedgerResult<Movement> {
    let movement_row = MovementRow::from_row(row)
        .map_err(|e| LedgerError::storage(format!("failed to deserialize movement row: {e}")))?;
    Movement::try_from(movement_row)
        .map_err(|e| LedgerError::storage(format!("corrupt movement row: {e}")))
}

/// The storage traits are synchronous while Postgres work is async; bridge
/// through the ambient tokio runtime. `Handle::block_on` panics on a
/// runtime worker thread, so these impls must be reached from a
/// `spawn_blocking` closure or a `block_in_place` section, never straight
/// from an async task.
fn runtime_handle() -> LedgerResult<tokio::runtime::Handle> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        LedgerError::storage("PostgresLedgerStore requires a tokio runtime context")
    })
}

impl QuantityStore for PostgresLedgerStore {
    fn get(&self, store_id: &StoreId, part_number: &PartNumber) -> LedgerResult<StockItem> {
        runtime_handle()?.block_on(self.get_item(store_id, part_number))
    }

    fn apply_delta(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        delta: i64,
        expected_revision: ExpectedRevision,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockItem> {
        runtime_handle()?.block_on(self.apply_delta_checked(
            store_id,
            part_number,
            delta,
            expected_revision,
            now,
        ))
    }

    fn provision(&self, item: StockItem) -> LedgerResult<StockItem> {
        runtime_handle()?.block_on(self.provision_item(item))
    }

    fn set_active(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        active: bool,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockItem> {
        runtime_handle()?.block_on(self.set_item_active(store_id, part_number, active, now))
    }

    fn list(&self, store_id: &StoreId) -> LedgerResult<Vec<StockItem>> {
        runtime_handle()?.block_on(self.list_items(store_id))
    }

    fn record_cost(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        cost_price: Money,
        now: DateTime<Utc>,
    ) -> LedgerResult<StockItem> {
        runtime_handle()?.block_on(self.record_cost_price(store_id, part_number, cost_price, now))
    }
}

impl MovementLog for PostgresLedgerStore {
    fn record(&self, movement: UncommittedMovement) -> LedgerResult<Movement> {
        runtime_handle()?.block_on(self.record_movement(movement))
    }

    fn list_by_item(
        &self,
        store_id: &StoreId,
        part_number: &PartNumber,
        since: Option<DateTime<Utc>>,
    ) -> LedgerResult<Vec<Movement>> {
        runtime_handle()?.block_on(self.movements_for_item(store_id, part_number, since))
    }

    fn find_by_reference(
        &self,
        store_id: &StoreId,
        reference_id: &ReferenceId,
    ) -> LedgerResult<Vec<Movement>> {
        runtime_handle()?.block_on(self.movements_for_reference(store_id, reference_id))
    }

    fn find_by_id(
        &self,
        store_id: &StoreId,
        movement_id: MovementId,
    ) -> LedgerResult<Option<Movement>> {
        runtime_handle()?.block_on(self.movement_by_id(store_id, movement_id))
    }

    fn find_reversal(
        &self,
        store_id: &StoreId,
        movement_id: MovementId,
    ) -> LedgerResult<Option<Movement>> {
        runtime_handle()?.block_on(self.reversal_of(store_id, movement_id))
    }
}

#[async_trait::async_trait]
impl MovementQuery for PostgresLedgerStore {
    async fn query_movements(
        &self,
        store_id: StoreId,
        filter: MovementFilter,
        pagination: Pagination,
    ) -> LedgerResult<MovementPage> {
        // Optional filters collapse into one parameterized query.
        let part_param: Option<&str> = filter.part_number.as_ref().map(|p| p.as_str());
        let kind_param: Option<&str> = filter.kind.map(|k| k.as_str());
        let reference_param: Option<&str> = filter.reference_id.as_ref().map(|r| r.as_str());

        let count_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM movements
            WHERE store_id = $1
                AND ($2::text IS NULL OR part_number = $2)
                AND ($3::text IS NULL OR kind = $3)
                AND ($4::text IS NULL OR reference_id = $4)
                AND (NOT $5::bool OR status = 'applied')
                AND ($6::timestamptz IS NULL OR applied_at >= $6)
                AND ($7::timestamptz IS NULL OR applied_at <= $7)
            "#,
        )
        .bind(store_id.as_str())
        .bind(part_param)
        .bind(kind_param)
        .bind(reference_param)
        .bind(filter.applied_only)
        .bind(filter.applied_after)
        .bind(filter.applied_before)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_movements", e))?;

        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| LedgerError::storage(format!("failed to read count: {e}")))?;

        let rows = sqlx::query(
            r#"
            SELECT
                id,
                store_id,
                part_number,
                kind,
                quantity_delta,
                unit_price,
                counterparty,
                reference_id,
                status,
                reject_reason,
                quantity_after,
                reverses,
                applied_at,
                sequence
            FROM movements
            WHERE store_id = $1
                AND ($2::text IS NULL OR part_number = $2)
                AND ($3::text IS NULL OR kind = $3)
                AND ($4::text IS NULL OR reference_id = $4)
                AND (NOT $5::bool OR status = 'applied')
                AND ($6::timestamptz IS NULL OR applied_at >= $6)
                AND ($7::timestamptz IS NULL OR applied_at <= $7)
            ORDER BY applied_at DESC, sequence DESC
            LIMIT $8 OFFSET $9
            "#,
        )
        .bind(store_id.as_str())
        .bind(part_param)
        .bind(kind_param)
        .bind(reference_param)
        .bind(filter.applied_only)
        .bind(filter.applied_after)
        .bind(filter.applied_before)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_movements", e))?;

        let movements = rows
            .iter()
            .map(decode_movement)
            .collect::<LedgerResult<Vec<Movement>>>()?;

        let has_more = total > i64::from(pagination.offset + pagination.limit);

        Ok(MovementPage {
            movements,
            total: total as u64,
            pagination,
            has_more,
        })
    }

    async fn get_movement(
        &self,
        store_id: StoreId,
        movement_id: MovementId,
    ) -> LedgerResult<Option<Movement>> {
        self.movement_by_id(&store_id, movement_id).await
    }
}
