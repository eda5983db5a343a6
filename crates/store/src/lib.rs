//! `partsledger-store` — storage boundary for the stock ledger.
//!
//! This crate defines the two persistence traits the reconciliation engine
//! drives — [`QuantityStore`] for the authoritative on-hand rows and
//! [`MovementLog`] for the append-only movement history — plus two
//! realizations: an in-memory store for tests/dev and a Postgres-backed one.

pub mod in_memory;
pub mod movement_log;
pub mod postgres;
pub mod quantity;
pub mod query;

pub use in_memory::{InMemoryMovementLog, InMemoryQuantityStore};
pub use movement_log::MovementLog;
pub use postgres::PostgresLedgerStore;
pub use quantity::QuantityStore;
pub use query::{MovementFilter, MovementPage, MovementQuery, Pagination};
