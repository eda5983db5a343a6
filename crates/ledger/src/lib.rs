//! `partsledger-ledger` — movement and stock-item domain model.
//!
//! Pure domain types: the append-only movement vocabulary, the authoritative
//! stock row, and the replay/valuation helpers the rest of the workspace
//! builds on. No storage or concurrency concerns live here.

pub mod item;
pub mod movement;

pub use item::{StockItem, StockSummary, summarize};
pub use movement::{
    Movement, MovementKind, MovementRequest, MovementStatus, UncommittedMovement,
    replayed_quantity,
};
