//! Process-wide tracing setup shared by binaries, benches, and tests.

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use crate::tracing::{init, init_for_tests};
