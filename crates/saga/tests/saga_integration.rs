//! Integration tests for the order fulfillment saga.

use std::sync::Arc;

use inventory::{InMemoryInventoryStore, MovementQuery, MovementType, ProductId, ReservationEngine};
use order::{InMemoryOrderRepository, Money, Order, OrderItem, OrderRepository, OrderStatus};
use saga::{
    CheckoutService, CompensationOutcome, InMemoryDeliveryService, InMemoryEventPublisher,
    InMemoryPaymentProcessor, InMemorySagaStateStore, OrderSagaOrchestrator, PaymentMethod,
    PaymentProcessor, SagaStateStore, SagaStatus, SagaStep,
};

const KEYBOARD: ProductId = ProductId::new(1);
const MOUSE: ProductId = ProductId::new(2);

type Engine = Arc<ReservationEngine<InMemoryInventoryStore>>;
type TestCheckout = CheckoutService<
    InMemorySagaStateStore,
    InMemoryOrderRepository,
    Engine,
    InMemoryDeliveryService,
    InMemoryEventPublisher,
    InMemoryPaymentProcessor,
>;

struct TestHarness {
    checkout: Arc<TestCheckout>,
    engine: Engine,
    sagas: InMemorySagaStateStore,
    orders: InMemoryOrderRepository,
    delivery: InMemoryDeliveryService,
    events: InMemoryEventPublisher,
    payments: InMemoryPaymentProcessor,
}

impl TestHarness {
    async fn new() -> Self {
        let engine = Arc::new(ReservationEngine::without_publisher(
            InMemoryInventoryStore::new(),
        ));
        engine
            .initialize_inventory(KEYBOARD, 10, "SYSTEM")
            .await
            .unwrap();
        engine.initialize_inventory(MOUSE, 5, "SYSTEM").await.unwrap();

        let sagas = InMemorySagaStateStore::new();
        let orders = InMemoryOrderRepository::new();
        let delivery = InMemoryDeliveryService::new();
        let events = InMemoryEventPublisher::new();
        let payments = InMemoryPaymentProcessor::new();

        let orchestrator = OrderSagaOrchestrator::new(
            sagas.clone(),
            orders.clone(),
            engine.clone(),
            delivery.clone(),
            events.clone(),
        );
        let checkout = Arc::new(CheckoutService::new(orchestrator, payments.clone()));

        Self {
            checkout,
            engine,
            sagas,
            orders,
            delivery,
            events,
            payments,
        }
    }

    fn items(&self, keyboards: u32, mice: u32) -> Vec<OrderItem> {
        let mut items = Vec::new();
        if keyboards > 0 {
            items.push(OrderItem::new(
                KEYBOARD,
                "Keyboard",
                keyboards,
                Money::from_units(50),
            ));
        }
        if mice > 0 {
            items.push(OrderItem::new(MOUSE, "Mouse", mice, Money::from_units(20)));
        }
        items
    }

    async fn create(&self, keyboards: u32, mice: u32) -> Order {
        self.checkout
            .create_order("user-1", &self.items(keyboards, mice), None, None)
            .await
            .unwrap()
    }

    /// Saves a confirmed order without starting its saga.
    async fn stored_order(&self, keyboards: u32, mice: u32) -> Order {
        let mut order = Order::new("user-1");
        for item in self.items(keyboards, mice) {
            order
                .add_item(item.product_id, item.product_name, item.price, item.quantity)
                .unwrap();
        }
        order.confirm().unwrap();
        self.orders.save(&order).await.unwrap();
        order
    }

    async fn counters(&self, product_id: ProductId) -> (u32, u32) {
        let inv = self.engine.get_inventory(product_id).await.unwrap();
        (inv.available, inv.reserved)
    }

    async fn order(&self, order_number: &str) -> Order {
        self.orders
            .find_by_order_number(order_number)
            .await
            .unwrap()
            .unwrap()
    }

    async fn ledger_types(&self, order_number: &str) -> Vec<MovementType> {
        let mut movements = self
            .engine
            .get_stock_movements(&MovementQuery::for_reference(order_number))
            .await
            .unwrap();
        movements.reverse();
        movements.into_iter().map(|m| m.movement_type).collect()
    }
}

#[tokio::test]
async fn test_checkout_happy_path() {
    let h = TestHarness::new().await;
    let order = h
        .checkout
        .create_order(
            "user-1",
            &h.items(2, 1),
            Some(Money::from_units(20)),
            None,
        )
        .await
        .unwrap();
    assert_eq!(order.status(), OrderStatus::Confirmed);
    assert_eq!(order.final_amount(), Money::from_units(100));
    assert_eq!(h.counters(KEYBOARD).await, (8, 2));
    assert_eq!(h.counters(MOUSE).await, (4, 1));

    let paid = h
        .checkout
        .pay_order("user-1", order.order_number(), PaymentMethod::Card)
        .await
        .unwrap();
    assert_eq!(paid.status(), OrderStatus::Paid);
    assert!(h.payments.is_charged(order.order_number()));

    assert_eq!(h.counters(KEYBOARD).await, (8, 0));
    assert_eq!(h.counters(MOUSE).await, (4, 0));
    assert_eq!(h.delivery.active_count(), 1);

    let saga = h
        .checkout
        .orchestrator()
        .get_saga(order.order_number())
        .await
        .unwrap();
    assert_eq!(saga.status(), SagaStatus::Completed);
    assert_eq!(saga.completed_steps(), &saga::STEP_ORDER);
    assert!(saga.completed_at().is_some());

    let ledger = h.ledger_types(order.order_number()).await;
    assert_eq!(ledger.iter().filter(|t| **t == MovementType::Reserve).count(), 2);
    assert_eq!(ledger.iter().filter(|t| **t == MovementType::Deduct).count(), 2);
    assert!(!ledger.contains(&MovementType::Release));

    assert_eq!(
        h.events.event_types_for(order.order_number()),
        vec!["OrderCreated", "SagaCompleted", "OrderPaid"]
    );
}

#[tokio::test]
async fn test_failure_right_after_reservation_releases_everything() {
    let h = TestHarness::new().await;
    h.sagas
        .set_fail_on_save_at(Some(SagaStep::ProcessPayment))
        .await;

    let err = h
        .checkout
        .create_order("user-1", &h.items(3, 2), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SAGA_EXECUTION_FAILED");

    assert_eq!(h.counters(KEYBOARD).await, (10, 0));
    assert_eq!(h.counters(MOUSE).await, (5, 0));

    let failed = h.sagas.find_by_status(SagaStatus::Failed).await.unwrap();
    assert_eq!(failed.len(), 1);
    let saga = &failed[0];
    assert!(saga.is_step_completed(SagaStep::ReserveInventory));

    let order = h.order(saga.order_number()).await;
    assert_eq!(order.status(), OrderStatus::Cancelled);

    let ledger = h.ledger_types(saga.order_number()).await;
    assert_eq!(
        ledger,
        vec![
            MovementType::Reserve,
            MovementType::Reserve,
            MovementType::Release,
            MovementType::Release
        ]
    );
    let releases = h
        .engine
        .get_stock_movements(
            &MovementQuery::for_reference(saga.order_number()).movement_type(MovementType::Release),
        )
        .await
        .unwrap();
    assert!(releases.iter().all(|m| m.reference_type == "ORDER_CANCEL"));
    assert!(releases.iter().all(|m| m.performed_by == "SYSTEM"));

    assert_eq!(h.events.event_types_for(saga.order_number()), vec!["SagaFailed"]);
}

#[tokio::test]
async fn test_failure_after_deduction_keeps_stock_and_cancels_delivery() {
    let h = TestHarness::new().await;
    let order = h.create(4, 0).await;
    h.sagas
        .set_fail_on_save_at(Some(SagaStep::ConfirmOrder))
        .await;

    let err = h
        .checkout
        .pay_order("user-1", order.order_number(), PaymentMethod::Card)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SAGA_EXECUTION_FAILED");

    // Deducted stock is gone for good.
    assert_eq!(h.counters(KEYBOARD).await, (6, 0));
    let ledger = h.ledger_types(order.order_number()).await;
    assert_eq!(ledger, vec![MovementType::Reserve, MovementType::Deduct]);

    assert_eq!(h.delivery.active_count(), 0);
    assert!(h.delivery.delivery_for(order.id()).unwrap().cancelled);
    assert_eq!(h.order(order.order_number()).await.status(), OrderStatus::Cancelled);

    let saga = h.sagas.find_by_order_number(order.order_number()).await.unwrap().unwrap();
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert!(saga.is_step_completed(SagaStep::DeductInventory));
    assert!(saga.is_step_completed(SagaStep::CreateDelivery));

    let failed_event = h
        .events
        .events()
        .into_iter()
        .find_map(|e| match e {
            saga::FulfillmentEvent::SagaFailed(data) => Some(data),
            _ => None,
        })
        .unwrap();
    assert!(failed_event.manual_intervention);
}

#[tokio::test]
async fn test_delivery_failure_compensates_without_release() {
    let h = TestHarness::new().await;
    let order = h.create(1, 1).await;
    h.delivery.set_fail_on_create(true);

    let err = h
        .checkout
        .pay_order("user-1", order.order_number(), PaymentMethod::BankTransfer)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SAGA_EXECUTION_FAILED");

    let saga = h.sagas.find_by_order_number(order.order_number()).await.unwrap().unwrap();
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert!(saga.is_step_completed(SagaStep::DeductInventory));
    assert!(!saga.is_step_completed(SagaStep::CreateDelivery));

    assert_eq!(h.counters(KEYBOARD).await, (9, 0));
    assert_eq!(h.counters(MOUSE).await, (4, 0));
    assert!(!h.ledger_types(order.order_number()).await.contains(&MovementType::Release));
    assert_eq!(h.order(order.order_number()).await.status(), OrderStatus::Cancelled);

    // The charge made before completion is handed back.
    assert_eq!(h.payments.payment_count(), 1);
    assert_eq!(h.payments.refund_count(), 1);
    assert!(!h.payments.is_charged(order.order_number()));
}

#[tokio::test]
async fn test_failed_refund_still_reports_saga_failure() {
    let h = TestHarness::new().await;
    let order = h.create(1, 0).await;
    h.delivery.set_fail_on_create(true);
    h.payments.set_fail_on_refund(true);

    let err = h
        .checkout
        .pay_order("user-1", order.order_number(), PaymentMethod::Card)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SAGA_EXECUTION_FAILED");

    assert!(h.payments.is_charged(order.order_number()));
    assert_eq!(h.payments.refund_count(), 0);
    assert_eq!(h.order(order.order_number()).await.status(), OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_pay_rejects_order_with_payment_in_flight() {
    let h = TestHarness::new().await;
    let order = h.create(2, 0).await;
    // Another request charged the order and has not completed the saga yet.
    h.payments
        .charge(order.order_number(), order.final_amount(), PaymentMethod::Card)
        .await
        .unwrap();

    let err = h
        .checkout
        .pay_order("user-1", order.order_number(), PaymentMethod::Card)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PAYMENT_ALREADY_COMPLETED");

    assert_eq!(h.payments.payment_count(), 1);
    assert_eq!(h.payments.refund_count(), 0);
    assert_eq!(h.counters(KEYBOARD).await, (8, 2));
    let saga = h.checkout.orchestrator().get_saga(order.order_number()).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Started);
    assert_eq!(saga.current_step(), SagaStep::ProcessPayment);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_payments_charge_once() {
    let h = TestHarness::new().await;
    let order = h.create(2, 0).await;
    let number = order.order_number().to_string();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let checkout = h.checkout.clone();
        let number = number.clone();
        handles.push(tokio::spawn(async move {
            checkout.pay_order("user-1", &number, PaymentMethod::Card).await
        }));
    }

    let mut paid = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => paid += 1,
            Err(e) => assert!(
                ["PAYMENT_ALREADY_COMPLETED", "INVALID_ORDER_STATUS"].contains(&e.code()),
                "unexpected error {e}"
            ),
        }
    }

    assert_eq!(paid, 1);
    assert_eq!(h.payments.payment_count(), 1);
    assert_eq!(h.payments.refund_count(), 0);
    assert_eq!(h.order(&number).await.status(), OrderStatus::Paid);
    assert_eq!(h.counters(KEYBOARD).await, (8, 0));
}

#[tokio::test]
async fn test_compensation_gives_up_after_three_attempts() {
    let h = TestHarness::new().await;
    let order = h.create(2, 0).await;
    let orchestrator = h.checkout.orchestrator();
    h.sagas
        .set_fail_on_save_at(Some(SagaStep::ConfirmOrder))
        .await;
    h.delivery.set_fail_on_cancel(true);

    h.checkout
        .pay_order("user-1", order.order_number(), PaymentMethod::Card)
        .await
        .unwrap_err();

    let saga = orchestrator.get_saga(order.order_number()).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Compensating);
    assert_eq!(saga.compensation_attempts(), 1);

    let second = orchestrator
        .resume_compensation(order.order_number())
        .await
        .unwrap();
    assert_eq!(second, CompensationOutcome::RetryScheduled { attempts: 2 });

    let third = orchestrator
        .resume_compensation(order.order_number())
        .await
        .unwrap();
    assert_eq!(third, CompensationOutcome::Exhausted);

    let mut saga = orchestrator.get_saga(order.order_number()).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::CompensationFailed);
    assert_eq!(saga.compensation_attempts(), 3);
    assert!(saga.completed_at().is_some());

    // A fourth attempt changes nothing.
    h.delivery.set_fail_on_cancel(false);
    let err = orchestrator
        .resume_compensation(order.order_number())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_SAGA_STATE");
    let fourth = orchestrator.compensate(&mut saga, "retry").await.unwrap();
    assert_eq!(fourth, CompensationOutcome::AlreadyTerminal);

    let stored = orchestrator.get_saga(order.order_number()).await.unwrap();
    assert_eq!(stored.status(), SagaStatus::CompensationFailed);
    assert_eq!(stored.compensation_attempts(), 3);
    assert_eq!(h.delivery.active_count(), 1);

    let listed = orchestrator
        .find_sagas_by_status(SagaStatus::CompensationFailed)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert!(
        h.events
            .event_types_for(order.order_number())
            .contains(&"SagaCompensationFailed")
    );
}

#[tokio::test]
async fn test_resumed_compensation_can_succeed() {
    let h = TestHarness::new().await;
    let order = h.create(2, 0).await;
    let orchestrator = h.checkout.orchestrator();
    h.sagas
        .set_fail_on_save_at(Some(SagaStep::ConfirmOrder))
        .await;
    h.delivery.set_fail_on_cancel(true);

    h.checkout
        .pay_order("user-1", order.order_number(), PaymentMethod::Card)
        .await
        .unwrap_err();

    h.delivery.set_fail_on_cancel(false);
    let outcome = orchestrator
        .resume_compensation(order.order_number())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CompensationOutcome::Compensated {
            manual_intervention: true
        }
    );

    let saga = orchestrator.get_saga(order.order_number()).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert_eq!(saga.compensation_attempts(), 1);
    assert_eq!(h.delivery.active_count(), 0);
}

#[tokio::test]
async fn test_declined_payment_keeps_reservation_until_cancel() {
    let h = TestHarness::new().await;
    let order = h.create(3, 1).await;
    h.payments.set_decline(true);

    let err = h
        .checkout
        .pay_order("user-1", order.order_number(), PaymentMethod::VirtualAccount)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PAYMENT_FAILED");

    assert_eq!(h.counters(KEYBOARD).await, (7, 3));
    let saga = h.checkout.orchestrator().get_saga(order.order_number()).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Started);
    assert_eq!(saga.current_step(), SagaStep::ProcessPayment);

    let cancelled = h
        .checkout
        .cancel_order("user-1", order.order_number(), "changed my mind")
        .await
        .unwrap();
    assert_eq!(cancelled.status(), OrderStatus::Cancelled);
    assert_eq!(cancelled.cancel_reason(), Some("changed my mind"));

    assert_eq!(h.counters(KEYBOARD).await, (10, 0));
    assert_eq!(h.counters(MOUSE).await, (5, 0));

    let saga = h.checkout.orchestrator().get_saga(order.order_number()).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert_eq!(
        saga.last_error_message(),
        Some("Order cancelled by user: changed my mind")
    );

    let releases = h
        .engine
        .get_stock_movements(
            &MovementQuery::for_reference(order.order_number()).movement_type(MovementType::Release),
        )
        .await
        .unwrap();
    assert_eq!(releases.len(), 2);
    assert!(releases.iter().all(|m| m.performed_by == "user-1"));

    assert_eq!(
        h.events.event_types_for(order.order_number()),
        vec!["OrderCreated", "OrderCancelled"]
    );
}

#[tokio::test]
async fn test_cancel_after_pending_compensation_releases_once() {
    let h = TestHarness::new().await;
    let orchestrator = h.checkout.orchestrator();
    let order = h.stored_order(4, 2).await;

    h.sagas
        .set_fail_on_save_at(Some(SagaStep::ProcessPayment))
        .await;
    h.orders.set_fail_on_save(true);

    orchestrator.start_saga(&order).await.unwrap_err();

    // Stock went back, but the order could not be cancelled.
    assert_eq!(h.counters(KEYBOARD).await, (10, 0));
    let saga = orchestrator.get_saga(order.order_number()).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Compensating);
    assert_eq!(saga.compensation_attempts(), 1);

    h.orders.set_fail_on_save(false);
    h.checkout
        .cancel_order("user-1", order.order_number(), "too slow")
        .await
        .unwrap();

    assert_eq!(h.counters(KEYBOARD).await, (10, 0));
    assert_eq!(h.counters(MOUSE).await, (5, 0));
    let releases = h
        .engine
        .get_stock_movements(
            &MovementQuery::for_reference(order.order_number()).movement_type(MovementType::Release),
        )
        .await
        .unwrap();
    assert_eq!(releases.len(), 2);

    let saga = orchestrator.get_saga(order.order_number()).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert_eq!(
        orchestrator
            .resume_compensation(order.order_number())
            .await
            .unwrap_err()
            .code(),
        "INVALID_SAGA_STATE"
    );
}

#[tokio::test]
async fn test_cancel_after_compensation_is_rejected_and_stock_unchanged() {
    let h = TestHarness::new().await;
    h.sagas
        .set_fail_on_save_at(Some(SagaStep::ProcessPayment))
        .await;
    h.checkout
        .create_order("user-1", &h.items(1, 1), None, None)
        .await
        .unwrap_err();
    let saga = h.sagas.find_by_status(SagaStatus::Failed).await.unwrap().remove(0);

    let err = h
        .checkout
        .cancel_order("user-1", saga.order_number(), "again")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ORDER_CANNOT_BE_CANCELLED");
    assert_eq!(h.counters(KEYBOARD).await, (10, 0));
    assert_eq!(h.counters(MOUSE).await, (5, 0));
}

#[tokio::test]
async fn test_cancel_and_pay_checks() {
    let h = TestHarness::new().await;
    let order = h.create(1, 0).await;

    let err = h
        .checkout
        .cancel_order("user-2", order.order_number(), "not mine")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ORDER_USER_MISMATCH");

    let err = h
        .checkout
        .pay_order("user-1", "ORD-20250101-DEADBEEF", PaymentMethod::Card)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ORDER_NOT_FOUND");

    h.checkout
        .pay_order("user-1", order.order_number(), PaymentMethod::Card)
        .await
        .unwrap();

    let err = h
        .checkout
        .cancel_order("user-1", order.order_number(), "too late")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ORDER_CANNOT_BE_CANCELLED");

    let err = h
        .checkout
        .pay_order("user-1", order.order_number(), PaymentMethod::Card)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_ORDER_STATUS");
    assert_eq!(h.payments.payment_count(), 1);
}

#[tokio::test]
async fn test_create_order_rejects_bad_items() {
    let h = TestHarness::new().await;

    let err = h
        .checkout
        .create_order("user-1", &[], None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_ORDER_ITEM");

    let zero = vec![OrderItem::new(KEYBOARD, "Keyboard", 0, Money::from_units(50))];
    let err = h
        .checkout
        .create_order("user-1", &zero, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_ORDER_ITEM");

    let overflowing = vec![
        OrderItem::new(KEYBOARD, "Keyboard", u32::MAX, Money::from_cents(1)),
        OrderItem::new(KEYBOARD, "Keyboard", 2, Money::from_cents(1)),
    ];
    let err = h
        .checkout
        .create_order("user-1", &overflowing, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_ORDER_ITEM");

    assert_eq!(h.orders.order_count().await, 0);
    assert_eq!(h.sagas.saga_count().await, 0);
    assert_eq!(h.counters(KEYBOARD).await, (10, 0));
}

#[tokio::test]
async fn test_publish_failures_do_not_fail_checkout() {
    let h = TestHarness::new().await;
    h.events.set_fail_on_publish(true);

    let order = h.create(1, 0).await;
    h.checkout
        .pay_order("user-1", order.order_number(), PaymentMethod::Card)
        .await
        .unwrap();

    assert!(h.events.events().is_empty());
    assert_eq!(h.order(order.order_number()).await.status(), OrderStatus::Paid);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checkouts_never_oversell() {
    let h = TestHarness::new().await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let checkout = h.checkout.clone();
        let items = h.items(1, 0);
        handles.push(tokio::spawn(async move {
            checkout
                .create_order(&format!("user-{i}"), &items, None, None)
                .await
        }));
    }

    let mut created = 0;
    let mut failed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(e) => {
                assert_eq!(e.code(), "SAGA_EXECUTION_FAILED");
                failed += 1;
            }
        }
    }

    assert_eq!(created, 10);
    assert_eq!(failed, 10);
    assert_eq!(h.counters(KEYBOARD).await, (0, 10));
    assert_eq!(
        h.sagas.find_by_status(SagaStatus::Failed).await.unwrap().len(),
        10
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_pay_and_cancel_settle_consistently() {
    let h = TestHarness::new().await;
    let order = h.create(5, 0).await;
    let number = order.order_number().to_string();

    let pay = {
        let checkout = h.checkout.clone();
        let number = number.clone();
        tokio::spawn(async move {
            checkout
                .pay_order("user-1", &number, PaymentMethod::Card)
                .await
        })
    };
    let cancel = {
        let checkout = h.checkout.clone();
        let number = number.clone();
        tokio::spawn(async move { checkout.cancel_order("user-1", &number, "race").await })
    };
    let paid = pay.await.unwrap();
    let cancelled = cancel.await.unwrap();

    let status = h.order(&number).await.status();
    match status {
        OrderStatus::Paid => {
            assert!(paid.is_ok());
            assert!(cancelled.is_err());
            assert_eq!(h.counters(KEYBOARD).await, (5, 0));
        }
        OrderStatus::Cancelled => {
            assert!(cancelled.is_ok());
            assert!(paid.is_err());
            assert_eq!(h.counters(KEYBOARD).await, (10, 0));
            // Cancelled between charge and completion means refunded.
            assert!(!h.payments.is_charged(&number));
        }
        other => panic!("unexpected order status {other}"),
    }
}
