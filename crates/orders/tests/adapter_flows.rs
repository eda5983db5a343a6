//! Order lifecycle flows driven end to end through the adapter, the
//! reconciliation engine, and the in-memory stores.

use std::sync::{Arc, Barrier};
use std::thread;

use partsledger_core::{LedgerError, Money, PartNumber, ReferenceId, StoreId};
use partsledger_engine::ReconciliationEngine;
use partsledger_ledger::{MovementKind, MovementRequest};
use partsledger_orders::{
    CheckoutPolicy, LineState, Order, OrderAdapter, OrderLine, ScanBatch, ScanLine, line_progress,
};
use partsledger_store::{InMemoryMovementLog, InMemoryQuantityStore};

type TestEngine = ReconciliationEngine<InMemoryQuantityStore, InMemoryMovementLog>;
type TestAdapter = OrderAdapter<InMemoryQuantityStore, InMemoryMovementLog>;

fn setup(policy: CheckoutPolicy) -> (Arc<TestEngine>, TestAdapter) {
    partsledger_observability::init_for_tests();
    let engine = Arc::new(ReconciliationEngine::new(
        InMemoryQuantityStore::new(),
        InMemoryMovementLog::new(),
    ));
    let adapter = OrderAdapter::new(Arc::clone(&engine), policy);
    (engine, adapter)
}

fn store() -> StoreId {
    StoreId::new("mjm").unwrap()
}

fn oil_filter() -> PartNumber {
    PartNumber::new("15400-RAF-T01").unwrap()
}

fn spark_plug() -> PartNumber {
    PartNumber::new("NGK-7090").unwrap()
}

fn stock(engine: &TestEngine, part: PartNumber, quantity: i64, reference: &str) {
    engine
        .submit(
            MovementRequest::new(
                store(),
                part,
                MovementKind::In,
                quantity,
                ReferenceId::new(reference).unwrap(),
            )
            .with_unit_price(Money::from_minor_units(450).unwrap()),
        )
        .unwrap();
}

fn quantity_of(engine: &TestEngine, part: &PartNumber) -> i64 {
    engine.item(&store(), part).unwrap().quantity_on_hand
}

fn state_of(engine: &TestEngine, reference: &str) -> LineState {
    let movements = engine
        .movements_for_reference(&store(), &ReferenceId::new(reference).unwrap())
        .unwrap();
    line_progress(&movements).unwrap().state
}

fn two_line_order() -> Order {
    Order::new("order-9", store())
        .with_customer("J. Rivera")
        .with_line(
            OrderLine::new(1, oil_filter(), 3)
                .with_unit_price(Money::from_minor_units(899).unwrap()),
        )
        .with_line(OrderLine::new(2, spark_plug(), 4))
}

fn scan(line_no: u32, part: PartNumber, quantity: i64) -> ScanLine {
    ScanLine::new(line_no)
        .with_part(part)
        .with_quantity(quantity)
        .with_customer("J. Rivera")
}

#[test]
fn checkout_reserves_every_line() {
    let (engine, adapter) = setup(CheckoutPolicy::RejectOrder);
    stock(&engine, oil_filter(), 20, "po-1");
    stock(&engine, spark_plug(), 10, "po-2");

    let outcome = adapter.on_checkout(&two_line_order()).unwrap();
    assert_eq!(outcome.reserved.len(), 2);
    assert!(outcome.backordered.is_empty());

    assert_eq!(quantity_of(&engine, &oil_filter()), 17);
    assert_eq!(quantity_of(&engine, &spark_plug()), 6);

    let first = &outcome.reserved[0];
    assert_eq!(first.reference.as_str(), "order-9/1");
    assert_eq!(first.movement.kind, MovementKind::Reserve);
    assert_eq!(first.movement.counterparty.as_deref(), Some("J. Rivera"));
    assert_eq!(first.movement.unit_price.unwrap().minor_units(), 899);

    assert_eq!(state_of(&engine, "order-9/1"), LineState::Reserved);
    assert_eq!(state_of(&engine, "order-9/2"), LineState::Reserved);
}

#[test]
fn rerunning_a_checkout_holds_nothing_twice() {
    let (engine, adapter) = setup(CheckoutPolicy::RejectOrder);
    stock(&engine, oil_filter(), 20, "po-1");
    stock(&engine, spark_plug(), 10, "po-2");

    let first = adapter.on_checkout(&two_line_order()).unwrap();
    let second = adapter.on_checkout(&two_line_order()).unwrap();

    assert_eq!(second.reserved[0].movement.id, first.reserved[0].movement.id);
    assert_eq!(second.reserved[1].movement.id, first.reserved[1].movement.id);
    assert_eq!(quantity_of(&engine, &oil_filter()), 17);
    assert_eq!(quantity_of(&engine, &spark_plug()), 6);
}

#[test]
fn reject_order_gives_back_earlier_holds() {
    let (engine, adapter) = setup(CheckoutPolicy::RejectOrder);
    stock(&engine, oil_filter(), 20, "po-1");
    stock(&engine, spark_plug(), 2, "po-2");

    match adapter.on_checkout(&two_line_order()) {
        Err(LedgerError::InsufficientStock {
            available,
            requested,
        }) => {
            assert_eq!(available, 2);
            assert_eq!(requested, 4);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    // The oil filter hold was rolled back.
    assert_eq!(quantity_of(&engine, &oil_filter()), 20);
    assert_eq!(quantity_of(&engine, &spark_plug()), 2);

    let movements = engine
        .movements_for_reference(&store(), &ReferenceId::new("order-9/1").unwrap())
        .unwrap();
    let reserve = line_progress(&movements).unwrap().reserve.unwrap();
    assert!(
        engine
            .reversal_of(&store(), reserve.id)
            .unwrap()
            .is_some(),
        "the hold must carry its compensating release"
    );
}

#[test]
fn a_rejected_checkout_cannot_be_rerun_under_the_same_order() {
    let (engine, adapter) = setup(CheckoutPolicy::RejectOrder);
    stock(&engine, oil_filter(), 20, "po-1");
    stock(&engine, spark_plug(), 2, "po-2");

    assert!(adapter.on_checkout(&two_line_order()).is_err());
    stock(&engine, spark_plug(), 10, "po-3");

    // The first line's reference is spent; retrying needs a fresh order id.
    match adapter.on_checkout(&two_line_order()) {
        Err(LedgerError::InvalidTransition { from, to }) => {
            assert_eq!(from, "released");
            assert_eq!(to, "reserved");
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
    assert_eq!(quantity_of(&engine, &oil_filter()), 20);
}

#[test]
fn backorder_flags_short_lines_and_continues() {
    let (engine, adapter) = setup(CheckoutPolicy::Backorder);
    stock(&engine, oil_filter(), 20, "po-1");
    stock(&engine, spark_plug(), 2, "po-2");

    let outcome = adapter.on_checkout(&two_line_order()).unwrap();
    assert_eq!(outcome.reserved.len(), 1);
    assert_eq!(outcome.backordered.len(), 1);

    let short = &outcome.backordered[0];
    assert_eq!(short.reference.as_str(), "order-9/2");
    assert!(matches!(
        short.error,
        LedgerError::InsufficientStock {
            available: 2,
            requested: 4
        }
    ));

    assert_eq!(quantity_of(&engine, &oil_filter()), 17);
    assert_eq!(quantity_of(&engine, &spark_plug()), 2);
}

#[test]
fn cancellation_releases_holds_idempotently() {
    let (engine, adapter) = setup(CheckoutPolicy::RejectOrder);
    stock(&engine, oil_filter(), 20, "po-1");
    stock(&engine, spark_plug(), 10, "po-2");
    adapter.on_checkout(&two_line_order()).unwrap();

    let outcome = adapter.on_order_cancelled(&two_line_order()).unwrap();
    assert_eq!(outcome.released.len(), 2);
    assert!(outcome.failed.is_empty());
    assert_eq!(quantity_of(&engine, &oil_filter()), 20);
    assert_eq!(quantity_of(&engine, &spark_plug()), 10);
    assert_eq!(state_of(&engine, "order-9/1"), LineState::Released);

    // Each release is the hold's reversal, recorded under the line
    // reference so the fold above sees it.
    let released = &outcome.released[0];
    assert_eq!(released.movement.kind, MovementKind::Release);
    let reserve = line_progress(
        &engine
            .movements_for_reference(&store(), &released.reference)
            .unwrap(),
    )
    .unwrap()
    .reserve
    .unwrap();
    assert_eq!(released.movement.reverses, Some(reserve.id));
    assert_eq!(
        engine.reversal_of(&store(), reserve.id).unwrap().unwrap().id,
        released.movement.id
    );

    // Cancelling again records nothing new.
    let again = adapter.on_order_cancelled(&two_line_order()).unwrap();
    assert!(again.released.is_empty());
    assert_eq!(again.already_released.len(), 2);
    assert!(again.failed.is_empty());
    assert_eq!(quantity_of(&engine, &oil_filter()), 20);
}

#[test]
fn cancelling_an_unreserved_line_fails() {
    let (_engine, adapter) = setup(CheckoutPolicy::RejectOrder);

    let order = Order::new("order-9", store()).with_line(OrderLine::new(1, oil_filter(), 3));
    let outcome = adapter.on_order_cancelled(&order).unwrap();
    assert!(outcome.released.is_empty());
    match &outcome.failed[0].error {
        LedgerError::InvalidTransition { from, to } => {
            assert_eq!(*from, "pending");
            assert_eq!(*to, "released");
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
}

#[test]
fn cancelling_after_a_rejected_checkout_records_nothing_new() {
    let (engine, adapter) = setup(CheckoutPolicy::RejectOrder);
    stock(&engine, oil_filter(), 20, "po-1");
    stock(&engine, spark_plug(), 2, "po-2");
    assert!(adapter.on_checkout(&two_line_order()).is_err());

    let outcome = adapter.on_order_cancelled(&two_line_order()).unwrap();
    assert!(outcome.released.is_empty());
    // Line 1's hold was already given back by the checkout rollback; line 2
    // never held anything.
    assert_eq!(outcome.already_released.len(), 1);
    assert_eq!(outcome.already_released[0].as_str(), "order-9/1");
    assert_eq!(outcome.failed.len(), 1);
    assert!(matches!(
        outcome.failed[0].error,
        LedgerError::InvalidTransition {
            from: "pending",
            to: "released"
        }
    ));

    assert_eq!(quantity_of(&engine, &oil_filter()), 20);
    assert_eq!(quantity_of(&engine, &spark_plug()), 2);
}

#[test]
fn shipment_converts_the_hold_into_a_dispatch() {
    let (engine, adapter) = setup(CheckoutPolicy::RejectOrder);
    stock(&engine, oil_filter(), 20, "po-1");
    let order = Order::new("order-9", store())
        .with_customer("J. Rivera")
        .with_line(
            OrderLine::new(1, oil_filter(), 3)
                .with_unit_price(Money::from_minor_units(899).unwrap()),
        );
    adapter.on_checkout(&order).unwrap();
    assert_eq!(quantity_of(&engine, &oil_filter()), 17);

    let batch = ScanBatch::new("ship-44", store(), "order-9").with_line(scan(1, oil_filter(), 3));
    let outcome = adapter.on_shipment_confirmed(&batch).unwrap();
    assert_eq!(outcome.shipped.len(), 1);
    assert!(outcome.failed.is_empty());

    // Hold given back, dispatch taken: net on-hand unchanged by conversion.
    assert_eq!(quantity_of(&engine, &oil_filter()), 17);
    assert_eq!(state_of(&engine, "order-9/1"), LineState::Shipped);

    let dispatched = &outcome.shipped[0].movement;
    assert_eq!(dispatched.kind, MovementKind::Out);
    assert_eq!(dispatched.quantity_delta, -3);
    assert_eq!(dispatched.unit_price.unwrap().minor_units(), 899);
    assert_eq!(dispatched.counterparty.as_deref(), Some("J. Rivera"));
}

#[test]
fn unreserved_lines_ship_directly() {
    let (engine, adapter) = setup(CheckoutPolicy::RejectOrder);
    stock(&engine, oil_filter(), 20, "po-1");

    let batch = ScanBatch::new("ship-44", store(), "order-9").with_line(scan(1, oil_filter(), 3));
    let outcome = adapter.on_shipment_confirmed(&batch).unwrap();

    assert_eq!(outcome.shipped.len(), 1);
    assert_eq!(quantity_of(&engine, &oil_filter()), 17);
    assert_eq!(state_of(&engine, "order-9/1"), LineState::Shipped);
}

#[test]
fn incomplete_scans_are_excluded_never_guessed() {
    let (engine, adapter) = setup(CheckoutPolicy::RejectOrder);
    stock(&engine, oil_filter(), 20, "po-1");
    stock(&engine, spark_plug(), 10, "po-2");

    let batch = ScanBatch::new("ship-44", store(), "order-9")
        .with_line(scan(1, oil_filter(), 2))
        .with_line(
            // No quantity scanned.
            ScanLine::new(2)
                .with_part(spark_plug())
                .with_customer("J. Rivera"),
        )
        .with_line(scan(3, spark_plug(), 0));

    let outcome = adapter.on_shipment_confirmed(&batch).unwrap();
    assert_eq!(outcome.shipped.len(), 1);
    assert_eq!(outcome.failed.len(), 2);
    for failure in &outcome.failed {
        assert!(matches!(
            failure.error,
            LedgerError::IncompleteLineItem(_)
        ));
    }

    // Only the complete line touched stock; the rest left no trace.
    assert_eq!(quantity_of(&engine, &oil_filter()), 18);
    assert_eq!(quantity_of(&engine, &spark_plug()), 10);
    assert!(
        engine
            .movements_for_reference(&store(), &ReferenceId::new("order-9/2").unwrap())
            .unwrap()
            .is_empty()
    );
}

#[test]
fn rescanning_a_shipment_changes_nothing() {
    let (engine, adapter) = setup(CheckoutPolicy::RejectOrder);
    stock(&engine, oil_filter(), 20, "po-1");
    let order = Order::new("order-9", store())
        .with_customer("J. Rivera")
        .with_line(OrderLine::new(1, oil_filter(), 3));
    adapter.on_checkout(&order).unwrap();

    let batch = ScanBatch::new("ship-44", store(), "order-9").with_line(scan(1, oil_filter(), 3));
    let first = adapter.on_shipment_confirmed(&batch).unwrap();
    let second = adapter.on_shipment_confirmed(&batch).unwrap();

    assert_eq!(
        second.shipped[0].movement.id,
        first.shipped[0].movement.id
    );
    assert_eq!(quantity_of(&engine, &oil_filter()), 17);
}

#[test]
fn cancelling_a_shipped_line_fails() {
    let (engine, adapter) = setup(CheckoutPolicy::RejectOrder);
    stock(&engine, oil_filter(), 20, "po-1");
    let order = Order::new("order-9", store())
        .with_customer("J. Rivera")
        .with_line(OrderLine::new(1, oil_filter(), 3));
    adapter.on_checkout(&order).unwrap();

    let batch = ScanBatch::new("ship-44", store(), "order-9").with_line(scan(1, oil_filter(), 3));
    adapter.on_shipment_confirmed(&batch).unwrap();

    let outcome = adapter.on_order_cancelled(&order).unwrap();
    match &outcome.failed[0].error {
        LedgerError::InvalidTransition { from, to } => {
            assert_eq!(*from, "shipped");
            assert_eq!(*to, "released");
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
    assert_eq!(quantity_of(&engine, &oil_filter()), 17);
}

#[test]
fn a_cancellation_racing_a_shipment_never_credits_stock_twice() {
    let (engine, adapter) = setup(CheckoutPolicy::RejectOrder);
    let adapter = Arc::new(adapter);

    let rounds = 200;
    stock(&engine, oil_filter(), 3 * rounds, "po-1");

    let mut dispatched = 0;
    for round in 0..rounds {
        let order = Order::new(format!("order-{round}"), store())
            .with_customer("J. Rivera")
            .with_line(OrderLine::new(1, oil_filter(), 3));
        adapter.on_checkout(&order).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let ship = {
            let adapter = Arc::clone(&adapter);
            let barrier = Arc::clone(&barrier);
            let batch =
                ScanBatch::new(format!("ship-{round}"), store(), format!("order-{round}"))
                    .with_line(scan(1, oil_filter(), 3));
            thread::spawn(move || {
                barrier.wait();
                adapter.on_shipment_confirmed(&batch)
            })
        };
        let cancel = {
            let adapter = Arc::clone(&adapter);
            let barrier = Arc::clone(&barrier);
            let order = order.clone();
            thread::spawn(move || {
                barrier.wait();
                adapter.on_order_cancelled(&order)
            })
        };

        let shipment = ship.join().unwrap().unwrap();
        let cancellation = cancel.join().unwrap().unwrap();

        let line_shipped = shipment.shipped.len() == 1;
        let hold_given_back = cancellation.released.len() == 1;
        assert!(
            line_shipped != hold_given_back,
            "round {round}: exactly one of dispatch and release must win"
        );
        if line_shipped {
            dispatched += 3;
        } else {
            assert_eq!(shipment.failed.len(), 1);
        }

        // Whatever the interleaving, the line's history must still fold.
        let expected = if line_shipped {
            LineState::Shipped
        } else {
            LineState::Released
        };
        assert_eq!(state_of(&engine, &format!("order-{round}/1")), expected);
    }

    // Every unit left the shelf exactly once or not at all.
    assert_eq!(quantity_of(&engine, &oil_filter()), 3 * rounds - dispatched);
}

#[test]
fn returns_restore_shipped_goods() {
    let (engine, adapter) = setup(CheckoutPolicy::RejectOrder);
    stock(&engine, oil_filter(), 20, "po-1");
    let order = Order::new("order-9", store())
        .with_customer("J. Rivera")
        .with_line(OrderLine::new(1, oil_filter(), 3));
    adapter.on_checkout(&order).unwrap();
    let batch = ScanBatch::new("ship-44", store(), "order-9").with_line(scan(1, oil_filter(), 3));
    adapter.on_shipment_confirmed(&batch).unwrap();

    let outcome = adapter.on_return(&order, &[1]).unwrap();
    assert_eq!(outcome.returned.len(), 1);
    assert_eq!(outcome.returned[0].movement.kind, MovementKind::Return);
    assert_eq!(outcome.returned[0].movement.quantity_delta, 3);
    assert_eq!(quantity_of(&engine, &oil_filter()), 20);
    assert_eq!(state_of(&engine, "order-9/1"), LineState::Returned);

    // A second return dedupes to the original movement.
    let again = adapter.on_return(&order, &[1]).unwrap();
    assert_eq!(
        again.returned[0].movement.id,
        outcome.returned[0].movement.id
    );
    assert_eq!(quantity_of(&engine, &oil_filter()), 20);
}

#[test]
fn returning_an_unshipped_line_fails() {
    let (engine, adapter) = setup(CheckoutPolicy::RejectOrder);
    stock(&engine, oil_filter(), 20, "po-1");
    let order = Order::new("order-9", store())
        .with_customer("J. Rivera")
        .with_line(OrderLine::new(1, oil_filter(), 3));
    adapter.on_checkout(&order).unwrap();

    let outcome = adapter.on_return(&order, &[1]).unwrap();
    match &outcome.failed[0].error {
        LedgerError::InvalidTransition { from, to } => {
            assert_eq!(*from, "reserved");
            assert_eq!(*to, "returned");
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }

    // Unknown line numbers are reported, not ignored.
    let missing = adapter.on_return(&order, &[7]).unwrap();
    assert!(matches!(
        missing.failed[0].error,
        LedgerError::InvalidMovement(_)
    ));
}
