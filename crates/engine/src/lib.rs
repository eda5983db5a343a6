//! Reconciliation engine: the single write path into the stock ledger.
//!
//! Every quantity change, whatever its origin, goes through
//! [`ReconciliationEngine::submit`]. The engine validates the request,
//! deduplicates it against the movement log, serializes writers per item,
//! applies the delta under the store's revision guard, and records the
//! outcome. Reads bypass the engine freely; writes never do.

pub mod lock;
pub mod reconcile;

pub use lock::{KeyGuard, KeyedLock};
pub use reconcile::{EngineConfig, ReconciliationEngine};
