//! Async query interface for movement inspection.
//!
//! The synchronous [`MovementLog`](crate::MovementLog) covers the engine's
//! needs; this interface serves audit/browse reads (filtered, paginated)
//! without loading whole histories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use partsledger_core::{LedgerResult, MovementId, PartNumber, ReferenceId, StoreId};
use partsledger_ledger::{Movement, MovementKind};

/// Pagination parameters for movement queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of movements to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50, // Safe default
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(1000), // Cap at 1000 for safety
            offset: offset.unwrap_or(0),
        }
    }
}

/// Filter criteria for movement queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementFilter {
    /// Filter by part number (optional).
    pub part_number: Option<PartNumber>,
    /// Filter by movement kind (optional).
    pub kind: Option<MovementKind>,
    /// Filter by reference id (optional).
    pub reference_id: Option<ReferenceId>,
    /// Keep only applied movements (drop rejected audit entries).
    pub applied_only: bool,
    /// Filter movements applied at or after this time (optional).
    pub applied_after: Option<DateTime<Utc>>,
    /// Filter movements applied at or before this time (optional).
    pub applied_before: Option<DateTime<Utc>>,
}

impl Default for MovementFilter {
    fn default() -> Self {
        Self {
            part_number: None,
            kind: None,
            reference_id: None,
            applied_only: false,
            applied_after: None,
            applied_before: None,
        }
    }
}

/// Paginated movement query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementPage {
    /// The movements matching the query, newest first.
    pub movements: Vec<Movement>,
    /// Total number of movements matching the filter (across all pages).
    pub total: u64,
    /// Pagination parameters used.
    pub pagination: Pagination,
    /// Whether there are more movements available.
    pub has_more: bool,
}

/// Async query interface over the movement history.
///
/// Results are ordered newest first: `applied_at` descending, `sequence`
/// descending as the tiebreaker.
#[async_trait]
pub trait MovementQuery: Send + Sync {
    /// Filtered, paginated page of a store's movement history.
    async fn query_movements(
        &self,
        store_id: StoreId,
        filter: MovementFilter,
        pagination: Pagination,
    ) -> LedgerResult<MovementPage>;

    /// Single movement by id.
    async fn get_movement(
        &self,
        store_id: StoreId,
        movement_id: MovementId,
    ) -> LedgerResult<Option<Movement>>;
}
