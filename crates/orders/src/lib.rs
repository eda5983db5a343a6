//! Order and shipment adapter.
//!
//! Translates order lifecycle events (checkout, cancellation, shipment
//! confirmation, returns) into ledger movements through the reconciliation
//! engine. Each order line maps to its own movement reference
//! (`"<order>/<line>"`), so a line's reservation lifecycle can be derived
//! from its movement history alone.

pub mod adapter;
pub mod line_state;
pub mod order;

pub use adapter::{
    CancellationOutcome, CheckoutOutcome, CheckoutPolicy, LineFailure, LineResult, OrderAdapter,
    ReturnOutcome, ShipmentOutcome,
};
pub use line_state::{LineProgress, LineState, line_progress};
pub use order::{CompleteScanLine, Order, OrderLine, ScanBatch, ScanLine};
