//! `partsledger-core` — shared vocabulary for the stock ledger.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod money;
pub mod part;
pub mod revision;

pub use error::{LedgerError, LedgerResult};
pub use id::{ItemKey, MovementId, ReferenceId, StoreId};
pub use money::{Money, unit_price_of};
pub use part::PartNumber;
pub use revision::ExpectedRevision;
