//! Routes stream events into ledgers.
//!
//! The dispatcher runs inline on the stream session's read loop: every order
//! event is applied to its symbol's ledger before the next frame is read.
//! Events it cannot place (stale snapshots, unknown orders that carry our
//! client id prefix) wake that symbol's reconciliation loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use grid_core::{CanonicalOrder, GridResult, KlineInterval};
use grid_td::{ExchangeAdapter, MarketEvent, MarketEventCallback, OrderEvent, OrderEventCallback};

use crate::ledger::{ApplyOutcome, SlotLedger};
use crate::reconcile::ReconcileTrigger;

struct Route {
    ledger: Arc<SlotLedger>,
    trigger: ReconcileTrigger,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub applied: u64,
    pub stale: u64,
    pub unmatched: u64,
    pub positions: u64,
}

pub struct EventDispatcher {
    exchange: String,
    client_order_prefix: String,
    routes: RwLock<AHashMap<String, Route>>,
    prices: RwLock<AHashMap<String, f64>>,
    applied: AtomicU64,
    stale: AtomicU64,
    unmatched: AtomicU64,
    positions: AtomicU64,
}

impl EventDispatcher {
    pub fn new(exchange: &str, client_order_prefix: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            client_order_prefix: format!("{client_order_prefix}-"),
            routes: RwLock::new(AHashMap::new()),
            prices: RwLock::new(AHashMap::new()),
            applied: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            unmatched: AtomicU64::new(0),
            positions: AtomicU64::new(0),
        }
    }

    /// Route events for `ledger.symbol()` to `ledger`, poking `trigger` on drift.
    pub fn register(&self, ledger: Arc<SlotLedger>, trigger: ReconcileTrigger) {
        let symbol = ledger.symbol().to_string();
        self.routes.write().insert(symbol, Route { ledger, trigger });
    }

    fn is_ours(&self, order: &CanonicalOrder) -> bool {
        order.client_order_id.starts_with(&self.client_order_prefix)
    }

    // -----------------------------------------------------------------------
    // Private stream
    // -----------------------------------------------------------------------

    pub fn handle_order_event(&self, event: OrderEvent) {
        match event {
            OrderEvent::Order(order) => self.handle_order(&order),
            OrderEvent::Position(position) => {
                let routes = self.routes.read();
                if let Some(route) = routes.get(&position.symbol) {
                    route.ledger.set_exchange_position(position.size);
                    self.positions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn handle_order(&self, order: &CanonicalOrder) {
        let routes = self.routes.read();
        let Some(route) = routes.get(&order.symbol) else {
            self.unmatched.fetch_add(1, Ordering::Relaxed);
            debug!("[dispatch] {}: no ledger for {}", self.exchange, order.symbol);
            return;
        };

        match route.ledger.apply_order_update(order) {
            ApplyOutcome::Applied => {
                self.applied.fetch_add(1, Ordering::Relaxed);
            }
            ApplyOutcome::Stale => {
                self.stale.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "[dispatch] {} {}: stale {:?} at {}",
                    self.exchange, order.symbol, order.status, order.update_time
                );
                route.trigger.fire();
            }
            ApplyOutcome::Retired => {
                self.stale.fetch_add(1, Ordering::Relaxed);
                debug!("[dispatch] {} {}: late event for completed {}", self.exchange, order.symbol, order.order_id);
            }
            ApplyOutcome::Unmatched => {
                self.unmatched.fetch_add(1, Ordering::Relaxed);
                if self.is_ours(order) {
                    warn!(
                        "[dispatch] {} {}: untracked order {} ({}), reconciling",
                        self.exchange, order.symbol, order.order_id, order.client_order_id
                    );
                    route.trigger.fire();
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Public stream
    // -----------------------------------------------------------------------

    pub fn handle_market_event(&self, event: MarketEvent) {
        let (symbol, price) = match event {
            MarketEvent::Ticker(ticker) => (ticker.symbol, ticker.last_price),
            MarketEvent::Kline(kline) => (kline.symbol, kline.close),
        };
        if price.is_finite() && price > 0.0 {
            self.prices.write().insert(symbol, price);
        }
    }

    /// Last price seen on the public stream.
    pub fn latest_price(&self, symbol: &str) -> Option<f64> {
        self.prices.read().get(symbol).copied()
    }

    // -----------------------------------------------------------------------
    // Wiring
    // -----------------------------------------------------------------------

    pub fn order_callback(self: &Arc<Self>) -> OrderEventCallback {
        let this = Arc::clone(self);
        Arc::new(move |event| this.handle_order_event(event))
    }

    pub fn market_callback(self: &Arc<Self>) -> MarketEventCallback {
        let this = Arc::clone(self);
        Arc::new(move |event| this.handle_market_event(event))
    }

    /// Start `adapter`'s order stream and, when `symbols` is non-empty, its
    /// kline stream, both delivering here.
    pub async fn attach(
        self: &Arc<Self>,
        adapter: &dyn ExchangeAdapter,
        symbols: &[String],
        interval: KlineInterval,
    ) -> GridResult<()> {
        adapter.start_order_stream(self.order_callback()).await?;
        if !symbols.is_empty() {
            adapter.start_kline_stream(symbols, interval, self.market_callback()).await?;
        }
        Ok(())
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            applied: self.applied.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            positions: self.positions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use grid_core::{CanonicalPosition, Kline, OrderStatus, Side, Ticker};
    use grid_td::mock::MockAdapter;

    use super::*;

    const SYMBOL: &str = "BTCUSDT";

    fn order(cid: &str, status: OrderStatus, ts: u64) -> CanonicalOrder {
        CanonicalOrder {
            order_id: format!("o-{cid}"),
            client_order_id: cid.into(),
            symbol: SYMBOL.into(),
            side: Side::Buy,
            price: 100.0,
            quantity: 1.0,
            filled_quantity: if status == OrderStatus::Filled { 1.0 } else { 0.0 },
            status,
            reduce_only: false,
            update_time: ts,
        }
    }

    fn setup() -> (Arc<EventDispatcher>, Arc<SlotLedger>, ReconcileTrigger) {
        let ledger = Arc::new(SlotLedger::new(SYMBOL, 10.0, 2));
        ledger.build_ladder(100.0, 1).unwrap();
        let trigger = ReconcileTrigger::new();
        let dispatcher = Arc::new(EventDispatcher::new("mock", "grid"));
        dispatcher.register(ledger.clone(), trigger.clone());
        (dispatcher, ledger, trigger)
    }

    async fn fired(trigger: &ReconcileTrigger) -> bool {
        tokio::time::timeout(Duration::from_millis(20), trigger.notified()).await.is_ok()
    }

    #[tokio::test]
    async fn reverse_arrival_applies_newest_and_flags_drift() {
        let (dispatcher, ledger, trigger) = setup();
        ledger.reserve_slot(100.0, Side::Buy, "grid-a-b-1", 1.0, 100.0, 1).unwrap();

        dispatcher.handle_order_event(OrderEvent::Order(order("grid-a-b-1", OrderStatus::Filled, 20)));
        dispatcher.handle_order_event(OrderEvent::Order(order("grid-a-b-1", OrderStatus::New, 10)));

        let slot = ledger.get_slot(100.0).unwrap();
        assert_eq!(slot.position_qty, 1.0);
        assert_eq!(ledger.get_total_buy_qty(), 1.0);
        assert_eq!(dispatcher.stats(), DispatcherStats { applied: 1, stale: 1, unmatched: 0, positions: 0 });
        assert!(fired(&trigger).await);
    }

    #[tokio::test]
    async fn only_our_unknown_orders_trigger_reconcile() {
        let (dispatcher, _, trigger) = setup();
        dispatcher.handle_order_event(OrderEvent::Order(order("manual", OrderStatus::New, 1)));
        assert!(!fired(&trigger).await);

        dispatcher.handle_order_event(OrderEvent::Order(order("grid-z-b-1", OrderStatus::New, 1)));
        assert!(fired(&trigger).await);
        assert_eq!(dispatcher.stats().unmatched, 2);
    }

    #[test]
    fn positions_and_prices_are_cached() {
        let (dispatcher, ledger, _) = setup();
        dispatcher.handle_order_event(OrderEvent::Position(CanonicalPosition {
            symbol: SYMBOL.into(),
            size: 0.3,
            ..Default::default()
        }));
        assert_eq!(ledger.exchange_position(), Some(0.3));

        dispatcher.handle_market_event(MarketEvent::Ticker(Ticker {
            symbol: SYMBOL.into(),
            last_price: 101.5,
            funding_rate: None,
            timestamp: 1,
        }));
        assert_eq!(dispatcher.latest_price(SYMBOL), Some(101.5));

        dispatcher.handle_market_event(MarketEvent::Kline(Kline {
            symbol: SYMBOL.into(),
            interval: KlineInterval::M1,
            open_time: 0,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 102.0,
            volume: 0.0,
        }));
        assert_eq!(dispatcher.latest_price(SYMBOL), Some(102.0));
        assert_eq!(dispatcher.latest_price("ETHUSDT"), None);
    }

    #[tokio::test]
    async fn attach_wires_both_streams() {
        let (dispatcher, ledger, _) = setup();
        let mock = MockAdapter::new("mock");
        dispatcher.attach(&mock, &[SYMBOL.to_string()], KlineInterval::M1).await.unwrap();
        assert!(mock.order_stream_running());

        ledger.reserve_slot(100.0, Side::Buy, "grid-a-b-1", 1.0, 100.0, 1).unwrap();
        assert!(mock.emit_order(OrderEvent::Order(order("grid-a-b-1", OrderStatus::New, 5))));
        assert_eq!(ledger.get_slot(100.0).unwrap().slot_status, grid_core::SlotStatus::Locked);

        assert!(mock.emit_market(MarketEvent::Ticker(Ticker {
            symbol: SYMBOL.into(),
            last_price: 99.0,
            funding_rate: None,
            timestamp: 1,
        })));
        assert_eq!(dispatcher.latest_price(SYMBOL), Some(99.0));
        assert!(dispatcher.attach(&mock, &[], KlineInterval::M1).await.is_err());
    }
}
