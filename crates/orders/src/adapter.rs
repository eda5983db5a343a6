//! Lifecycle-event to movement translation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use partsledger_core::{LedgerError, LedgerResult, Money, PartNumber, ReferenceId, StoreId};
use partsledger_engine::ReconciliationEngine;
use partsledger_ledger::{Movement, MovementKind, MovementRequest};
use partsledger_store::{MovementLog, QuantityStore};

use crate::line_state::{LineProgress, LineState, line_progress};
use crate::order::{CompleteScanLine, Order, OrderLine, ScanBatch};

/// What checkout does when a line cannot be covered by stock on hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutPolicy {
    /// Give back every hold taken for this checkout and fail the order.
    RejectOrder,
    /// Flag the short line as backordered and keep going.
    Backorder,
}

/// One line that produced an applied movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineResult {
    pub reference: ReferenceId,
    pub part_number: PartNumber,
    pub movement: Movement,
}

/// One line that did not, with the refusal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFailure {
    pub reference: ReferenceId,
    pub part_number: Option<PartNumber>,
    pub error: LedgerError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutOutcome {
    pub order_id: String,
    pub reserved: Vec<LineResult>,
    /// Lines short on stock, under the `Backorder` policy only.
    pub backordered: Vec<LineFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationOutcome {
    pub order_id: String,
    pub released: Vec<LineResult>,
    /// Lines whose hold was already gone; nothing new was recorded.
    pub already_released: Vec<ReferenceId>,
    pub failed: Vec<LineFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentOutcome {
    pub shipment_id: String,
    pub shipped: Vec<LineResult>,
    /// Incomplete scans and lifecycle refusals, with reasons. Failed lines
    /// are excluded from the ledger entirely, never applied with guesses.
    pub failed: Vec<LineFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnOutcome {
    pub order_id: String,
    pub returned: Vec<LineResult>,
    pub failed: Vec<LineFailure>,
}

/// Maps order lifecycle events onto engine submissions.
///
/// Per-line isolation is the rule: within a batch operation, one line's
/// refusal is reported and the rest proceed. The exception is checkout
/// under [`CheckoutPolicy::RejectOrder`], where the whole order stands or
/// falls together.
pub struct OrderAdapter<Q, L> {
    engine: Arc<ReconciliationEngine<Q, L>>,
    policy: CheckoutPolicy,
}

impl<Q, L> OrderAdapter<Q, L>
where
    Q: QuantityStore,
    L: MovementLog,
{
    pub fn new(engine: Arc<ReconciliationEngine<Q, L>>, policy: CheckoutPolicy) -> Self {
        Self { engine, policy }
    }

    /// Reserve stock for every line of the order.
    ///
    /// Checkout holds stock; it does not ship it. Re-running a checkout is
    /// safe: lines already reserved dedupe against their references.
    #[instrument(
        skip(self, order),
        fields(order_id = %order.id, store_id = %order.store_id, lines = order.lines.len(), policy = ?self.policy),
        err
    )]
    pub fn on_checkout(&self, order: &Order) -> LedgerResult<CheckoutOutcome> {
        order.validate()?;

        let mut reserved: Vec<LineResult> = Vec::new();
        let mut backordered = Vec::new();

        for line in &order.lines {
            let reference = line.reference(&order.id)?;

            if let Err(error) = self.reservable(&order.store_id, &reference) {
                self.roll_back_holds(&order.store_id, &reserved);
                return Err(error);
            }

            match self.engine.submit(self.reserve_request(order, line, &reference)) {
                Ok(movement) => reserved.push(LineResult {
                    reference,
                    part_number: line.part_number.clone(),
                    movement,
                }),
                Err(error @ LedgerError::InsufficientStock { .. }) => match self.policy {
                    CheckoutPolicy::Backorder => {
                        tracing::info!(reference_id = %reference, %error, "line backordered");
                        backordered.push(LineFailure {
                            reference,
                            part_number: Some(line.part_number.clone()),
                            error,
                        });
                    }
                    CheckoutPolicy::RejectOrder => {
                        self.roll_back_holds(&order.store_id, &reserved);
                        return Err(error);
                    }
                },
                Err(other) => {
                    self.roll_back_holds(&order.store_id, &reserved);
                    return Err(other);
                }
            }
        }

        Ok(CheckoutOutcome {
            order_id: order.id.clone(),
            reserved,
            backordered,
        })
    }

    /// Give back the holds of a cancelled order.
    ///
    /// Each release is recorded as the reserve's reversal under the line
    /// reference. Lines whose hold is already gone are reported as such
    /// without a new movement, so cancelling twice changes nothing. A
    /// shipped line cannot be cancelled; it has to come back as a return.
    #[instrument(
        skip(self, order),
        fields(order_id = %order.id, store_id = %order.store_id, lines = order.lines.len()),
        err
    )]
    pub fn on_order_cancelled(&self, order: &Order) -> LedgerResult<CancellationOutcome> {
        order.validate()?;

        let mut released = Vec::new();
        let mut already_released = Vec::new();
        let mut failed = Vec::new();

        for line in &order.lines {
            let reference = line.reference(&order.id)?;
            match self.release_line(&order.store_id, &reference) {
                Ok(Some(movement)) => released.push(LineResult {
                    reference,
                    part_number: line.part_number.clone(),
                    movement,
                }),
                Ok(None) => already_released.push(reference),
                Err(error) => failed.push(LineFailure {
                    reference,
                    part_number: Some(line.part_number.clone()),
                    error,
                }),
            }
        }

        Ok(CancellationOutcome {
            order_id: order.id.clone(),
            released,
            already_released,
            failed,
        })
    }

    /// Record the dispatch of scanned lines.
    ///
    /// A reserved line's hold is converted: the reservation is reversed and
    /// a fresh `Out` is recorded under the line reference. Unreserved lines
    /// ship directly. Each scan must be complete; an incomplete one fails
    /// with `IncompleteLineItem` and the rest of the batch proceeds.
    #[instrument(
        skip(self, batch),
        fields(
            shipment_id = %batch.shipment_id,
            order_id = %batch.order_id,
            store_id = %batch.store_id,
            lines = batch.lines.len()
        ),
        err
    )]
    pub fn on_shipment_confirmed(&self, batch: &ScanBatch) -> LedgerResult<ShipmentOutcome> {
        batch.validate()?;

        let mut shipped = Vec::new();
        let mut failed = Vec::new();

        for line in &batch.lines {
            let reference = ReferenceId::new(format!("{}/{}", batch.order_id, line.line_no))?;
            match line.complete() {
                Ok(complete) => match self.ship_line(&batch.store_id, &complete, &reference) {
                    Ok(movement) => shipped.push(LineResult {
                        reference,
                        part_number: complete.part_number.clone(),
                        movement,
                    }),
                    Err(error) => failed.push(LineFailure {
                        reference,
                        part_number: Some(complete.part_number),
                        error,
                    }),
                },
                Err(error) => {
                    tracing::warn!(reference_id = %reference, %error, "scan line excluded");
                    failed.push(LineFailure {
                        reference,
                        part_number: line.part_number.clone(),
                        error,
                    });
                }
            }
        }

        Ok(ShipmentOutcome {
            shipment_id: batch.shipment_id.clone(),
            shipped,
            failed,
        })
    }

    /// Take shipped lines back into stock.
    ///
    /// Only shipped lines can return; anything else fails the line with
    /// `InvalidTransition`. Returning a line twice dedupes to the original
    /// return movement.
    #[instrument(
        skip(self, order),
        fields(order_id = %order.id, store_id = %order.store_id, lines = line_numbers.len()),
        err
    )]
    pub fn on_return(&self, order: &Order, line_numbers: &[u32]) -> LedgerResult<ReturnOutcome> {
        order.validate()?;

        let mut returned = Vec::new();
        let mut failed = Vec::new();

        for &line_no in line_numbers {
            let reference = ReferenceId::new(format!("{}/{line_no}", order.id))?;
            let Some(line) = order.line(line_no) else {
                failed.push(LineFailure {
                    reference,
                    part_number: None,
                    error: LedgerError::invalid_movement(format!(
                        "order {} has no line {line_no}",
                        order.id
                    )),
                });
                continue;
            };

            match self.return_line(order, &reference) {
                Ok(movement) => returned.push(LineResult {
                    reference,
                    part_number: line.part_number.clone(),
                    movement,
                }),
                Err(error) => failed.push(LineFailure {
                    reference,
                    part_number: Some(line.part_number.clone()),
                    error,
                }),
            }
        }

        Ok(ReturnOutcome {
            order_id: order.id.clone(),
            returned,
            failed,
        })
    }

    /// Line history folded into lifecycle state, plus whether an existing
    /// hold has since been reversed out from under its reference.
    fn snapshot(
        &self,
        store_id: &StoreId,
        reference: &ReferenceId,
    ) -> LedgerResult<(LineProgress, bool)> {
        let movements = self.engine.movements_for_reference(store_id, reference)?;
        let progress = line_progress(&movements)?;

        let hold_released = match (&progress.state, &progress.reserve) {
            (LineState::Reserved, Some(reserve)) => self
                .engine
                .reversal_of(store_id, reserve.id)?
                .is_some(),
            _ => false,
        };
        Ok((progress, hold_released))
    }

    /// Checkout precheck for one line reference.
    fn reservable(&self, store_id: &StoreId, reference: &ReferenceId) -> LedgerResult<()> {
        let (progress, hold_released) = self.snapshot(store_id, reference)?;
        match progress.state {
            LineState::Pending => Ok(()),
            // The hold was reversed by an earlier rejected checkout; the
            // reference is spent and cannot hold stock again.
            LineState::Reserved if hold_released => Err(LedgerError::InvalidTransition {
                from: LineState::Released.name(),
                to: LineState::Reserved.name(),
            }),
            LineState::Reserved => Ok(()),
            state => Err(LedgerError::InvalidTransition {
                from: state.name(),
                to: LineState::Reserved.name(),
            }),
        }
    }

    fn reserve_request(
        &self,
        order: &Order,
        line: &OrderLine,
        reference: &ReferenceId,
    ) -> MovementRequest {
        let mut request = MovementRequest::new(
            order.store_id.clone(),
            line.part_number.clone(),
            MovementKind::Reserve,
            -line.quantity,
            reference.clone(),
        );
        if let Some(price) = line.unit_price {
            request = request.with_unit_price(price);
        }
        if let Some(customer) = &order.customer {
            request = request.with_counterparty(customer.clone());
        }
        request
    }

    /// Undo the holds taken so far in a failing checkout. Errors are logged
    /// and swallowed; the checkout failure itself is what the caller sees.
    fn roll_back_holds(&self, store_id: &StoreId, reserved: &[LineResult]) {
        for line in reserved {
            match self.engine.reverse(store_id, line.movement.id) {
                Ok(_) | Err(LedgerError::AlreadyReversed(_)) => {}
                Err(error) => {
                    tracing::error!(
                        %error,
                        reference_id = %line.reference,
                        "failed to roll back reservation"
                    );
                }
            }
        }
    }

    fn release_line(
        &self,
        store_id: &StoreId,
        reference: &ReferenceId,
    ) -> LedgerResult<Option<Movement>> {
        let (progress, hold_released) = self.snapshot(store_id, reference)?;
        match progress.state {
            LineState::Reserved if hold_released => Ok(None),
            LineState::Reserved => {
                let Some(reserve) = progress.reserve else {
                    return Err(LedgerError::storage(
                        "reserved line carries no reserve movement",
                    ));
                };
                // The release rides the one-reversal-per-movement gate
                // under the line's own reference, so this cancellation and
                // a concurrent shipment conversion collapse to one winner
                // even when both read the hold as live.
                match self
                    .engine
                    .reverse_under(store_id, reserve.id, reference.clone())
                {
                    Ok(movement) => Ok(Some(movement)),
                    Err(LedgerError::AlreadyReversed(_)) => Ok(None),
                    Err(other) => Err(other),
                }
            }
            LineState::Released => Ok(None),
            state => Err(LedgerError::InvalidTransition {
                from: state.name(),
                to: LineState::Released.name(),
            }),
        }
    }

    fn ship_line(
        &self,
        store_id: &StoreId,
        line: &CompleteScanLine,
        reference: &ReferenceId,
    ) -> LedgerResult<Movement> {
        let (progress, hold_released) = self.snapshot(store_id, reference)?;

        let unit_price = progress.reserve.as_ref().and_then(|r| r.unit_price);

        match progress.state {
            LineState::Reserved if !hold_released => {
                let Some(reserve) = &progress.reserve else {
                    return Err(LedgerError::storage(
                        "reserved line carries no reserve movement",
                    ));
                };
                // Give the hold back first; the dispatch below re-takes the
                // stock as a real Out.
                match self.engine.reverse(store_id, reserve.id) {
                    Ok(_) => {}
                    // Lost the hold to a concurrent giveback. A
                    // cancellation's release lands under the line
                    // reference, so re-reading the fold tells a cancelled
                    // line apart from a twin conversion of this one.
                    Err(LedgerError::AlreadyReversed(_)) => {
                        let (progress, _) = self.snapshot(store_id, reference)?;
                        if progress.state == LineState::Released {
                            return Err(LedgerError::InvalidTransition {
                                from: LineState::Released.name(),
                                to: LineState::Shipped.name(),
                            });
                        }
                    }
                    Err(other) => return Err(other),
                }
                self.submit_out(store_id, line, reference, unit_price)
            }
            // Pending ships directly; a reversed hold means the reference
            // holds nothing and the line ships like a fresh one; an
            // already-shipped line dedupes to its original Out.
            LineState::Pending | LineState::Reserved | LineState::Shipped => {
                self.submit_out(store_id, line, reference, unit_price)
            }
            state => Err(LedgerError::InvalidTransition {
                from: state.name(),
                to: LineState::Shipped.name(),
            }),
        }
    }

    fn submit_out(
        &self,
        store_id: &StoreId,
        line: &CompleteScanLine,
        reference: &ReferenceId,
        unit_price: Option<Money>,
    ) -> LedgerResult<Movement> {
        let mut request = MovementRequest::new(
            store_id.clone(),
            line.part_number.clone(),
            MovementKind::Out,
            -line.quantity,
            reference.clone(),
        )
        .with_counterparty(line.customer.clone());
        if let Some(price) = unit_price {
            request = request.with_unit_price(price);
        }
        self.engine.submit(request)
    }

    fn return_line(&self, order: &Order, reference: &ReferenceId) -> LedgerResult<Movement> {
        let (progress, _) = self.snapshot(&order.store_id, reference)?;
        match progress.state {
            LineState::Shipped | LineState::Returned => {
                let Some(shipped) = progress.shipped else {
                    return Err(LedgerError::storage(
                        "shipped line carries no out movement",
                    ));
                };
                let mut request = MovementRequest::new(
                    shipped.store_id.clone(),
                    shipped.part_number.clone(),
                    MovementKind::Return,
                    -shipped.quantity_delta,
                    reference.clone(),
                );
                if let Some(price) = shipped.unit_price {
                    request = request.with_unit_price(price);
                }
                if let Some(counterparty) = shipped.counterparty.clone() {
                    request = request.with_counterparty(counterparty);
                }
                self.engine.submit(request)
            }
            state => Err(LedgerError::InvalidTransition {
                from: state.name(),
                to: LineState::Returned.name(),
            }),
        }
    }
}
