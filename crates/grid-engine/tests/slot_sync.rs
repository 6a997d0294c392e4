//! End-to-end slot sync against the in-memory adapter: placement, stream
//! events, reconciliation and restart adoption working on one ledger.

use std::sync::Arc;
use std::time::Duration;

use grid_core::time_util::fixed_clock;
use grid_core::{
    CanonicalOrder, CanonicalPosition, GridError, KlineInterval, OrderStatus, PositionStatus, Side, SlotOrderStatus,
    SlotStatus,
};
use grid_engine::{
    EventDispatcher, MemoryStorage, ReconcileConfig, ReconciliationEngine, SlotExecutor, SlotLedger, TaskSupervisor,
};
use grid_td::mock::{MockAdapter, MockCall};
use grid_td::{ExchangeAdapter, OrderEvent};

const SYMBOL: &str = "BTCUSDT";

struct Harness {
    mock: Arc<MockAdapter>,
    ledger: Arc<SlotLedger>,
    storage: Arc<MemoryStorage>,
    engine: Arc<ReconciliationEngine>,
    dispatcher: Arc<EventDispatcher>,
    executor: SlotExecutor,
}

async fn harness(mock: Arc<MockAdapter>) -> Harness {
    let ledger = Arc::new(SlotLedger::new(SYMBOL, 100.0, 2));
    ledger.build_ladder(50_000.0, 3).unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let config = ReconcileConfig { missing_grace: Duration::ZERO, ..ReconcileConfig::default() };
    let adapter: Arc<dyn ExchangeAdapter> = mock.clone();
    let engine = Arc::new(
        ReconciliationEngine::new(adapter.clone(), ledger.clone(), storage.clone(), config)
            .with_clock(fixed_clock(1_700_000_000_000)),
    );
    let dispatcher = Arc::new(EventDispatcher::new(adapter.name(), "grid"));
    dispatcher.register(ledger.clone(), engine.trigger());
    dispatcher.attach(adapter.as_ref(), &[SYMBOL.to_string()], KlineInterval::M1).await.unwrap();
    let executor = SlotExecutor::new(adapter, ledger.clone(), "grid", 0.01).with_clock(fixed_clock(1));
    Harness { mock, ledger, storage, engine, dispatcher, executor }
}

fn with(order: &CanonicalOrder, status: OrderStatus, filled: f64, ts: u64) -> CanonicalOrder {
    CanonicalOrder { status, filled_quantity: filled, update_time: ts, ..order.clone() }
}

#[tokio::test]
async fn round_trip_through_the_stream() {
    let h = harness(Arc::new(MockAdapter::new("mock"))).await;

    let buy = h.executor.place_slot_order(49_900.0, Side::Buy).await.unwrap();
    h.mock.emit_order(OrderEvent::Order(with(&buy, OrderStatus::New, 0.0, 10)));
    h.mock.emit_order(OrderEvent::Order(with(&buy, OrderStatus::Filled, 0.01, 20)));

    let slot = h.ledger.get_slot(49_900.0).unwrap();
    assert_eq!(slot.position_status, PositionStatus::Filled);
    assert_eq!(slot.slot_status, SlotStatus::Free);

    let sell = h.executor.place_slot_order(49_900.0, Side::Sell).await.unwrap();
    assert_eq!(sell.price, 50_000.0);
    h.mock.emit_order(OrderEvent::Order(with(&sell, OrderStatus::Filled, 0.01, 30)));

    let slot = h.ledger.get_slot(49_900.0).unwrap();
    assert_eq!(slot.position_status, PositionStatus::Empty);
    assert_eq!(slot.order_status, SlotOrderStatus::NotPlaced);
    assert_eq!(h.ledger.get_total_buy_qty(), 0.01);
    assert_eq!(h.ledger.get_total_sell_qty(), 0.01);
    assert_eq!(h.dispatcher.stats().applied, 3);
}

#[tokio::test]
async fn cancel_seen_only_by_reconciliation() {
    let h = harness(Arc::new(MockAdapter::new("mock"))).await;
    let buy = h.executor.place_slot_order(49_800.0, Side::Buy).await.unwrap();
    assert_eq!(h.ledger.get_slot(49_800.0).unwrap().order_status, SlotOrderStatus::Placed);

    // The stream missed the cancel.
    h.mock.set_order(with(&buy, OrderStatus::Canceled, 0.0, 99));

    let record = h.engine.reconcile_once().await.unwrap();
    let slot = h.ledger.get_slot(49_800.0).unwrap();
    assert_eq!(slot.order_status, SlotOrderStatus::NotPlaced);
    assert_eq!(slot.slot_status, SlotStatus::Free);
    assert_eq!(h.ledger.get_reconcile_count(), 1);
    assert_eq!(record.repaired_orders, 1);
    assert_eq!(h.storage.records(), vec![record]);
}

#[tokio::test]
async fn failed_pass_is_invisible() {
    let h = harness(Arc::new(MockAdapter::new("mock"))).await;
    h.executor.place_slot_order(49_800.0, Side::Buy).await.unwrap();
    let before = h.ledger.snapshot();

    h.mock.fail(MockCall::Account, GridError::Transport("connection reset".into()));
    assert!(h.engine.reconcile_once().await.is_err());

    let after = h.ledger.snapshot();
    assert_eq!(after.slots, before.slots);
    assert_eq!(after.reconcile_count, 0);
    assert!(h.storage.records().is_empty());
}

#[tokio::test]
async fn events_in_reverse_order_keep_the_fill() {
    let h = harness(Arc::new(MockAdapter::new("mock"))).await;
    let buy = h.executor.place_slot_order(49_900.0, Side::Buy).await.unwrap();

    h.mock.emit_order(OrderEvent::Order(with(&buy, OrderStatus::Filled, 0.01, 30)));
    h.mock.emit_order(OrderEvent::Order(with(&buy, OrderStatus::PartiallyFilled, 0.005, 20)));
    h.mock.emit_order(OrderEvent::Order(with(&buy, OrderStatus::New, 0.0, 10)));

    let slot = h.ledger.get_slot(49_900.0).unwrap();
    assert_eq!(slot.order_status, SlotOrderStatus::Filled);
    assert_eq!(slot.position_qty, 0.01);
    assert_eq!(h.ledger.get_total_buy_qty(), 0.01);
    assert_eq!(h.dispatcher.stats().stale, 2);
}

#[tokio::test]
async fn restart_adopts_working_orders() {
    let mock = Arc::new(MockAdapter::new("mock"));
    let first = harness(mock.clone()).await;
    let buy = first.executor.place_slot_order(49_900.0, Side::Buy).await.unwrap();
    mock.stop_order_stream().await;
    mock.stop_kline_stream().await;
    drop(first);

    mock.set_positions(vec![CanonicalPosition { symbol: SYMBOL.into(), size: 0.0, ..Default::default() }]);
    let second = harness(mock.clone()).await;
    assert!(second.ledger.slot_for_order_id(&buy.order_id).is_none());

    let record = second.engine.reconcile_once().await.unwrap();
    assert_eq!(record.adopted_orders, 1);
    assert_eq!(second.ledger.slot_for_order_id(&buy.order_id), Some(49_900.0));
    assert_eq!(record.active_buy_orders, 1);

    // Once adopted, the stream drives it like any other order.
    mock.emit_order(OrderEvent::Order(with(&buy, OrderStatus::Filled, 0.01, 50)));
    assert_eq!(second.ledger.get_slot(49_900.0).unwrap().position_qty, 0.01);
}

#[tokio::test(start_paused = true)]
async fn untracked_own_order_wakes_the_loop() {
    let h = harness(Arc::new(MockAdapter::new("mock"))).await;
    let mut supervisor = TaskSupervisor::new();
    supervisor.spawn("reconcile", h.engine.clone().run(supervisor.subscribe()));

    let stray = CanonicalOrder {
        order_id: "x1".into(),
        client_order_id: "grid-ffffff-b-4970000-9".into(),
        symbol: SYMBOL.into(),
        side: Side::Buy,
        price: 49_700.0,
        quantity: 0.01,
        filled_quantity: 0.0,
        status: OrderStatus::New,
        reduce_only: false,
        update_time: 5,
    };
    h.mock.set_open_orders(vec![stray.clone()]);
    h.mock.emit_order(OrderEvent::Order(stray));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.ledger.get_reconcile_count(), 1);
    assert_eq!(h.ledger.slot_for_order_id("x1"), Some(49_700.0));

    assert_eq!(supervisor.shutdown(Duration::from_secs(1)).await, 0);
}
