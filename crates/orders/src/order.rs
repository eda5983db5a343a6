//! Order and shipment record types.

use serde::{Deserialize, Serialize};

use partsledger_core::{
    LedgerError, LedgerResult, Money, PartNumber, ReferenceId, StoreId, unit_price_of,
};

/// A customer order at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub store_id: StoreId,
    /// Customer name, carried onto movements as the counterparty.
    pub customer: Option<String>,
    pub lines: Vec<OrderLine>,
}

impl Order {
    pub fn new(id: impl Into<String>, store_id: StoreId) -> Self {
        Self {
            id: id.into(),
            store_id,
            customer: None,
            lines: Vec::new(),
        }
    }

    pub fn with_customer(mut self, customer: impl Into<String>) -> Self {
        self.customer = Some(customer.into());
        self
    }

    pub fn with_line(mut self, line: OrderLine) -> Self {
        self.lines.push(line);
        self
    }

    /// Non-empty id, at least one line, unique line numbers, valid lines.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.id.trim().is_empty() {
            return Err(LedgerError::invalid_movement("order id cannot be empty"));
        }
        if self.lines.is_empty() {
            return Err(LedgerError::invalid_movement(format!(
                "order {} has no lines",
                self.id
            )));
        }
        for (index, line) in self.lines.iter().enumerate() {
            line.validate()?;
            if self.lines[..index].iter().any(|l| l.line_no == line.line_no) {
                return Err(LedgerError::invalid_movement(format!(
                    "order {} repeats line number {}",
                    self.id, line.line_no
                )));
            }
        }
        Ok(())
    }

    pub fn line(&self, line_no: u32) -> Option<&OrderLine> {
        self.lines.iter().find(|line| line.line_no == line_no)
    }
}

/// One part on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub part_number: PartNumber,
    pub quantity: i64,
    /// Sell price per unit in minor units, if priced.
    pub unit_price: Option<Money>,
}

impl OrderLine {
    pub fn new(line_no: u32, part_number: PartNumber, quantity: i64) -> Self {
        Self {
            line_no,
            part_number,
            quantity,
            unit_price: None,
        }
    }

    pub fn with_unit_price(mut self, unit_price: Money) -> Self {
        self.unit_price = Some(unit_price);
        self
    }

    /// Reprice the line from an edited total: unit price is the exact
    /// decimal quotient rounded half-to-even to the minor unit.
    pub fn priced_by_total(mut self, total: Money) -> LedgerResult<Self> {
        self.unit_price = Some(unit_price_of(total, self.quantity)?);
        Ok(self)
    }

    /// Movement reference for this line: `"<order>/<line>"`.
    pub fn reference(&self, order_id: &str) -> LedgerResult<ReferenceId> {
        ReferenceId::new(format!("{order_id}/{}", self.line_no))
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.quantity <= 0 {
            return Err(LedgerError::invalid_movement(format!(
                "line {} quantity must be positive, got {}",
                self.line_no, self.quantity
            )));
        }
        Ok(())
    }
}

/// Lines scanned at the packing bench for one outgoing shipment.
///
/// Scans come from handheld devices and arrive ragged: any field can be
/// missing. Completeness is checked per line, not per batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanBatch {
    pub shipment_id: String,
    pub store_id: StoreId,
    /// Order whose line references the scans resolve against.
    pub order_id: String,
    pub lines: Vec<ScanLine>,
}

impl ScanBatch {
    pub fn new(
        shipment_id: impl Into<String>,
        store_id: StoreId,
        order_id: impl Into<String>,
    ) -> Self {
        Self {
            shipment_id: shipment_id.into(),
            store_id,
            order_id: order_id.into(),
            lines: Vec::new(),
        }
    }

    pub fn with_line(mut self, line: ScanLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.shipment_id.trim().is_empty() {
            return Err(LedgerError::invalid_movement("shipment id cannot be empty"));
        }
        if self.order_id.trim().is_empty() {
            return Err(LedgerError::invalid_movement(format!(
                "shipment {} carries no order id",
                self.shipment_id
            )));
        }
        Ok(())
    }
}

/// One raw scanned line. Fields are optional until proven complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanLine {
    pub line_no: u32,
    pub part_number: Option<PartNumber>,
    pub quantity: Option<i64>,
    pub customer: Option<String>,
}

impl ScanLine {
    pub fn new(line_no: u32) -> Self {
        Self {
            line_no,
            part_number: None,
            quantity: None,
            customer: None,
        }
    }

    pub fn with_part(mut self, part_number: PartNumber) -> Self {
        self.part_number = Some(part_number);
        self
    }

    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_customer(mut self, customer: impl Into<String>) -> Self {
        self.customer = Some(customer.into());
        self
    }

    /// Prove the scan complete: part number, positive quantity, and
    /// customer all present. Anything less is `IncompleteLineItem`; the
    /// line must be fixed and rescanned, never guessed at.
    pub fn complete(&self) -> LedgerResult<CompleteScanLine> {
        let part_number = self.part_number.clone().ok_or_else(|| {
            LedgerError::incomplete_line(format!("line {} is missing a part number", self.line_no))
        })?;
        let quantity = self.quantity.ok_or_else(|| {
            LedgerError::incomplete_line(format!("line {} is missing a quantity", self.line_no))
        })?;
        if quantity <= 0 {
            return Err(LedgerError::incomplete_line(format!(
                "line {} quantity must be positive, got {quantity}",
                self.line_no
            )));
        }
        let customer = self.customer.clone().ok_or_else(|| {
            LedgerError::incomplete_line(format!("line {} is missing a customer", self.line_no))
        })?;
        Ok(CompleteScanLine {
            line_no: self.line_no,
            part_number,
            quantity,
            customer,
        })
    }
}

/// A scanned line with every required field present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteScanLine {
    pub line_no: u32,
    pub part_number: PartNumber,
    pub quantity: i64,
    pub customer: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> StoreId {
        StoreId::new("mjm").unwrap()
    }

    fn test_part() -> PartNumber {
        PartNumber::new("15400-RAF-T01").unwrap()
    }

    #[test]
    fn order_validation_catches_duplicates_and_bad_quantities() {
        let order = Order::new("order-9", test_store())
            .with_line(OrderLine::new(1, test_part(), 3))
            .with_line(OrderLine::new(1, test_part(), 2));
        match order.validate() {
            Err(LedgerError::InvalidMovement(msg)) => {
                assert!(msg.contains("repeats line number 1"));
            }
            other => panic!("expected InvalidMovement, got {other:?}"),
        }

        let order =
            Order::new("order-9", test_store()).with_line(OrderLine::new(1, test_part(), 0));
        assert!(order.validate().is_err());

        let empty = Order::new("order-9", test_store());
        assert!(empty.validate().is_err());
    }

    #[test]
    fn line_references_embed_order_and_line() {
        let line = OrderLine::new(2, test_part(), 1);
        assert_eq!(line.reference("order-9").unwrap().as_str(), "order-9/2");
    }

    #[test]
    fn repricing_by_total_rounds_half_to_even() {
        let line = OrderLine::new(1, test_part(), 2)
            .priced_by_total(Money::from_minor_units(1001).unwrap())
            .unwrap();
        assert_eq!(line.unit_price.unwrap().minor_units(), 500);

        let line = OrderLine::new(1, test_part(), 2)
            .priced_by_total(Money::from_minor_units(1003).unwrap())
            .unwrap();
        assert_eq!(line.unit_price.unwrap().minor_units(), 502);
    }

    #[test]
    fn scan_lines_must_be_fully_present() {
        let complete = ScanLine::new(1)
            .with_part(test_part())
            .with_quantity(3)
            .with_customer("J. Rivera")
            .complete()
            .unwrap();
        assert_eq!(complete.quantity, 3);

        let missing_part = ScanLine::new(1).with_quantity(3).with_customer("J. Rivera");
        match missing_part.complete() {
            Err(LedgerError::IncompleteLineItem(msg)) => {
                assert!(msg.contains("part number"));
            }
            other => panic!("expected IncompleteLineItem, got {other:?}"),
        }

        let zero_quantity = ScanLine::new(2)
            .with_part(test_part())
            .with_quantity(0)
            .with_customer("J. Rivera");
        assert!(matches!(
            zero_quantity.complete(),
            Err(LedgerError::IncompleteLineItem(_))
        ));

        let missing_customer = ScanLine::new(3).with_part(test_part()).with_quantity(1);
        assert!(matches!(
            missing_customer.complete(),
            Err(LedgerError::IncompleteLineItem(_))
        ));
    }
}
