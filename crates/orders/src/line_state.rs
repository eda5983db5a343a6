//! Line-item reservation lifecycle.
//!
//! A line's state is never stored; it is derived by folding the applied
//! movements recorded under the line's reference, in history order:
//!
//! ```text
//! pending --reserve--> reserved --out--> shipped --return--> returned
//!    |                    |
//!    +------out---------->+--release--> released
//!         (direct ship)
//! ```
//!
//! `shipped`, `released`, and `returned` are terminal. Any other step fails
//! with `InvalidTransition`.

use serde::{Deserialize, Serialize};

use partsledger_core::{LedgerError, LedgerResult};
use partsledger_ledger::{Movement, MovementKind};

/// Where an order line stands in its reservation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineState {
    /// No applied movements yet.
    Pending,
    /// Stock held for the line.
    Reserved,
    /// Goods dispatched.
    Shipped,
    /// Hold given back; the line will not ship.
    Released,
    /// Dispatched goods came back.
    Returned,
}

impl LineState {
    pub fn name(&self) -> &'static str {
        match self {
            LineState::Pending => "pending",
            LineState::Reserved => "reserved",
            LineState::Shipped => "shipped",
            LineState::Released => "released",
            LineState::Returned => "returned",
        }
    }

    /// State a movement of `kind` lands the line in.
    fn target_of(kind: MovementKind) -> &'static str {
        match kind {
            MovementKind::Reserve => "reserved",
            MovementKind::Out => "shipped",
            MovementKind::Release => "released",
            MovementKind::Return => "returned",
            MovementKind::In => "received",
        }
    }

    /// Apply one movement kind to the lifecycle.
    fn step(self, kind: MovementKind) -> LedgerResult<LineState> {
        let next = match (self, kind) {
            (LineState::Pending, MovementKind::Reserve) => LineState::Reserved,
            (LineState::Pending, MovementKind::Out) => LineState::Shipped,
            (LineState::Reserved, MovementKind::Out) => LineState::Shipped,
            (LineState::Reserved, MovementKind::Release) => LineState::Released,
            (LineState::Shipped, MovementKind::Return) => LineState::Returned,
            (from, kind) => {
                return Err(LedgerError::InvalidTransition {
                    from: from.name(),
                    to: Self::target_of(kind),
                });
            }
        };
        Ok(next)
    }
}

impl core::fmt::Display for LineState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle state plus the movements the adapter needs to act on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineProgress {
    pub state: LineState,
    /// The applied `Reserve`, once the line has been reserved.
    pub reserve: Option<Movement>,
    /// The applied `Out`, once the line has shipped.
    pub shipped: Option<Movement>,
}

impl LineProgress {
    fn start() -> Self {
        Self {
            state: LineState::Pending,
            reserve: None,
            shipped: None,
        }
    }
}

/// Fold a line's movement history into its lifecycle state.
///
/// Rejected movements are skipped; they never advanced the line. The input
/// must be in history order (as the movement log returns it). An impossible
/// sequence fails with the offending transition.
pub fn line_progress<'a, I>(movements: I) -> LedgerResult<LineProgress>
where
    I: IntoIterator<Item = &'a Movement>,
{
    let mut progress = LineProgress::start();
    for movement in movements.into_iter().filter(|m| m.is_applied()) {
        progress.state = progress.state.step(movement.kind)?;
        match movement.kind {
            MovementKind::Reserve => progress.reserve = Some(movement.clone()),
            MovementKind::Out => progress.shipped = Some(movement.clone()),
            _ => {}
        }
    }
    Ok(progress)
}
