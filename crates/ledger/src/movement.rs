use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use partsledger_core::{
    ItemKey, LedgerError, LedgerResult, Money, MovementId, PartNumber, ReferenceId, StoreId,
};

/// Movement type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    /// Goods received from a supplier.
    In,
    /// Goods dispatched to a customer.
    Out,
    /// Tentative hold placed at order time.
    Reserve,
    /// A reservation given back (cancellation).
    Release,
    /// Dispatched goods coming back.
    Return,
}

impl MovementKind {
    /// Tag used in persisted rows and tracing fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::In => "in",
            MovementKind::Out => "out",
            MovementKind::Reserve => "reserve",
            MovementKind::Release => "release",
            MovementKind::Return => "return",
        }
    }

    /// Whether this kind adds stock. Inbound kinds carry positive deltas,
    /// outbound kinds negative ones.
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            MovementKind::In | MovementKind::Release | MovementKind::Return
        )
    }

    /// Kind of the compensating movement that undoes this one.
    ///
    /// An undone sale comes back as a customer return, not as new supplier
    /// goods, so `Out` maps to `Return` rather than `In`.
    pub fn reversal(&self) -> MovementKind {
        match self {
            MovementKind::In => MovementKind::Out,
            MovementKind::Out => MovementKind::Return,
            MovementKind::Reserve => MovementKind::Release,
            MovementKind::Release => MovementKind::Reserve,
            MovementKind::Return => MovementKind::Out,
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(MovementKind::In),
            "out" => Ok(MovementKind::Out),
            "reserve" => Ok(MovementKind::Reserve),
            "release" => Ok(MovementKind::Release),
            "return" => Ok(MovementKind::Return),
            other => Err(LedgerError::invalid_movement(format!(
                "unknown movement kind: {other}"
            ))),
        }
    }
}

/// Terminal status of a recorded movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "reason")]
pub enum MovementStatus {
    /// The delta reached the quantity store.
    Applied,
    /// Stock rules refused the delta; recorded for audit, never applied.
    Rejected(String),
}

impl MovementStatus {
    pub fn is_applied(&self) -> bool {
        matches!(self, MovementStatus::Applied)
    }

    pub fn reject_reason(&self) -> Option<&str> {
        match self {
            MovementStatus::Applied => None,
            MovementStatus::Rejected(reason) => Some(reason),
        }
    }
}

/// A request to change on-hand quantity, before reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub store_id: StoreId,
    pub part_number: PartNumber,
    pub kind: MovementKind,
    /// Signed delta; the sign must agree with `kind`.
    pub quantity_delta: i64,
    /// Price at time of movement, audit/costing only.
    pub unit_price: Option<Money>,
    /// Supplier for `In`, customer for `Out`. Advisory free text.
    pub counterparty: Option<String>,
    /// Idempotency key linking back to the originating record.
    pub reference_id: ReferenceId,
}

impl MovementRequest {
    pub fn new(
        store_id: StoreId,
        part_number: PartNumber,
        kind: MovementKind,
        quantity_delta: i64,
        reference_id: ReferenceId,
    ) -> Self {
        Self {
            store_id,
            part_number,
            kind,
            quantity_delta,
            unit_price: None,
            counterparty: None,
            reference_id,
        }
    }

    pub fn with_unit_price(mut self, unit_price: Money) -> Self {
        self.unit_price = Some(unit_price);
        self
    }

    pub fn with_counterparty(mut self, counterparty: impl Into<String>) -> Self {
        self.counterparty = Some(counterparty.into());
        self
    }

    /// Sign/kind consistency and non-zero delta.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.quantity_delta == 0 {
            return Err(LedgerError::invalid_movement(
                "quantity delta cannot be zero",
            ));
        }
        if self.kind.is_inbound() && self.quantity_delta < 0 {
            return Err(LedgerError::invalid_movement(format!(
                "{} movements must carry a positive delta, got {}",
                self.kind, self.quantity_delta
            )));
        }
        if !self.kind.is_inbound() && self.quantity_delta > 0 {
            return Err(LedgerError::invalid_movement(format!(
                "{} movements must carry a negative delta, got {}",
                self.kind, self.quantity_delta
            )));
        }
        Ok(())
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.store_id.clone(), self.part_number.clone())
    }
}

/// A reconciled movement not yet assigned its per-item sequence.
///
/// The movement log assigns sequences during `record`; everything else is
/// fixed at reconciliation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedMovement {
    pub id: MovementId,
    pub store_id: StoreId,
    pub part_number: PartNumber,
    pub kind: MovementKind,
    pub quantity_delta: i64,
    pub unit_price: Option<Money>,
    pub counterparty: Option<String>,
    pub reference_id: ReferenceId,
    pub status: MovementStatus,
    /// On-hand snapshot after application; `None` for rejected movements.
    pub quantity_after: Option<i64>,
    /// Movement this one compensates, when it is a reversal.
    pub reverses: Option<MovementId>,
    pub applied_at: DateTime<Utc>,
}

impl UncommittedMovement {
    /// Applied movement carrying the resulting on-hand snapshot.
    pub fn applied(
        request: &MovementRequest,
        quantity_after: i64,
        applied_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MovementId::new(),
            store_id: request.store_id.clone(),
            part_number: request.part_number.clone(),
            kind: request.kind,
            quantity_delta: request.quantity_delta,
            unit_price: request.unit_price,
            counterparty: request.counterparty.clone(),
            reference_id: request.reference_id.clone(),
            status: MovementStatus::Applied,
            quantity_after: Some(quantity_after),
            reverses: None,
            applied_at,
        }
    }

    /// Rejected movement, recorded for audit only.
    pub fn rejected(
        request: &MovementRequest,
        reason: impl Into<String>,
        applied_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MovementId::new(),
            store_id: request.store_id.clone(),
            part_number: request.part_number.clone(),
            kind: request.kind,
            quantity_delta: request.quantity_delta,
            unit_price: request.unit_price,
            counterparty: request.counterparty.clone(),
            reference_id: request.reference_id.clone(),
            status: MovementStatus::Rejected(reason.into()),
            quantity_after: None,
            reverses: None,
            applied_at,
        }
    }

    pub fn with_reverses(mut self, original: MovementId) -> Self {
        self.reverses = Some(original);
        self
    }

    /// Attach the per-item sequence assigned by the movement log.
    pub fn committed(self, sequence: u64) -> Movement {
        Movement {
            id: self.id,
            store_id: self.store_id,
            part_number: self.part_number,
            kind: self.kind,
            quantity_delta: self.quantity_delta,
            unit_price: self.unit_price,
            counterparty: self.counterparty,
            reference_id: self.reference_id,
            status: self.status,
            quantity_after: self.quantity_after,
            reverses: self.reverses,
            applied_at: self.applied_at,
            sequence,
        }
    }
}

/// One immutable entry in an item's movement history.
///
/// Corrections are new compensating movements, never edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub store_id: StoreId,
    pub part_number: PartNumber,
    pub kind: MovementKind,
    pub quantity_delta: i64,
    pub unit_price: Option<Money>,
    pub counterparty: Option<String>,
    pub reference_id: ReferenceId,
    pub status: MovementStatus,
    pub quantity_after: Option<i64>,
    pub reverses: Option<MovementId>,
    pub applied_at: DateTime<Utc>,
    /// Monotonically increasing position in the item's history. Total order
    /// even when `applied_at` timestamps collide.
    pub sequence: u64,
}

impl Movement {
    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.store_id.clone(), self.part_number.clone())
    }

    pub fn is_applied(&self) -> bool {
        self.status.is_applied()
    }
}

/// Sum of applied deltas: the on-hand quantity a replay of `movements`
/// yields. Rejected movements contribute nothing.
pub fn replayed_quantity<'a, I>(movements: I) -> i64
where
    I: IntoIterator<Item = &'a Movement>,
{
    movements
        .into_iter()
        .filter(|m| m.is_applied())
        .map(|m| m.quantity_delta)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_request(kind: MovementKind, delta: i64) -> MovementRequest {
        MovementRequest::new(
            StoreId::new("mjm").unwrap(),
            PartNumber::new("15400-RAF-T01").unwrap(),
            kind,
            delta,
            ReferenceId::new("po-1").unwrap(),
        )
    }

    #[test]
    fn inbound_kinds_require_positive_deltas() {
        assert!(test_request(MovementKind::In, 20).validate().is_ok());
        assert!(test_request(MovementKind::Release, 2).validate().is_ok());
        assert!(test_request(MovementKind::Return, 1).validate().is_ok());

        for kind in [MovementKind::In, MovementKind::Release, MovementKind::Return] {
            let err = test_request(kind, -5).validate().unwrap_err();
            match err {
                LedgerError::InvalidMovement(msg) if msg.contains("positive delta") => {}
                other => panic!("expected sign mismatch, got {other:?}"),
            }
        }
    }

    #[test]
    fn outbound_kinds_require_negative_deltas() {
        assert!(test_request(MovementKind::Out, -3).validate().is_ok());
        assert!(test_request(MovementKind::Reserve, -2).validate().is_ok());

        for kind in [MovementKind::Out, MovementKind::Reserve] {
            let err = test_request(kind, 5).validate().unwrap_err();
            match err {
                LedgerError::InvalidMovement(msg) if msg.contains("negative delta") => {}
                other => panic!("expected sign mismatch, got {other:?}"),
            }
        }
    }

    #[test]
    fn zero_delta_is_rejected_for_every_kind() {
        for kind in [
            MovementKind::In,
            MovementKind::Out,
            MovementKind::Reserve,
            MovementKind::Release,
            MovementKind::Return,
        ] {
            assert!(test_request(kind, 0).validate().is_err());
        }
    }

    #[test]
    fn reversal_mapping_inverts_stock_direction() {
        assert_eq!(MovementKind::In.reversal(), MovementKind::Out);
        assert_eq!(MovementKind::Out.reversal(), MovementKind::Return);
        assert_eq!(MovementKind::Reserve.reversal(), MovementKind::Release);
        assert_eq!(MovementKind::Release.reversal(), MovementKind::Reserve);
        assert_eq!(MovementKind::Return.reversal(), MovementKind::Out);

        // A reversal always moves stock the opposite way.
        for kind in [
            MovementKind::In,
            MovementKind::Out,
            MovementKind::Reserve,
            MovementKind::Release,
            MovementKind::Return,
        ] {
            assert_ne!(kind.is_inbound(), kind.reversal().is_inbound());
        }
    }

    #[test]
    fn kind_round_trips_through_its_tag() {
        for kind in [
            MovementKind::In,
            MovementKind::Out,
            MovementKind::Reserve,
            MovementKind::Release,
            MovementKind::Return,
        ] {
            assert_eq!(kind.as_str().parse::<MovementKind>().unwrap(), kind);
        }
        assert!("refund".parse::<MovementKind>().is_err());
    }

    #[test]
    fn rejected_movements_do_not_replay() {
        let request = test_request(MovementKind::In, 20);
        let applied = UncommittedMovement::applied(&request, 20, Utc::now()).committed(1);

        let out = test_request(MovementKind::Out, -50);
        let rejected =
            UncommittedMovement::rejected(&out, "insufficient stock", Utc::now()).committed(2);

        assert_eq!(replayed_quantity([&applied, &rejected]), 20);
        assert_eq!(rejected.quantity_after, None);
        assert_eq!(
            rejected.status.reject_reason(),
            Some("insufficient stock")
        );
    }

    #[test]
    fn status_serde_carries_the_reason_only_when_rejected() {
        let applied = serde_json::to_value(MovementStatus::Applied).unwrap();
        assert_eq!(applied, serde_json::json!({ "status": "applied" }));

        let rejected =
            serde_json::to_value(MovementStatus::Rejected("insufficient stock".into())).unwrap();
        assert_eq!(
            rejected,
            serde_json::json!({ "status": "rejected", "reason": "insufficient stock" })
        );
    }
}
