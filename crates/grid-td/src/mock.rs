//! In-memory [`ExchangeAdapter`] with scripted state and injectable failures.
//!
//! Used by the engine tests. Placed orders become open orders immediately;
//! stream callbacks are stored so a test can push events through
//! [`MockAdapter::emit_order`] exactly as a live stream would.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use grid_core::{
    CanonicalAccount, CanonicalOrder, CanonicalPosition, FundingRate, GridError, GridResult, Kline, KlineInterval,
    MarketMeta, OrderRequest, OrderStatus,
};

use crate::symbol_mapper::{SymbolMapper, SymbolStyle};
use crate::{ExchangeAdapter, MarketEvent, MarketEventCallback, OrderEvent, OrderEventCallback};

/// Adapter operation, used to script failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    PlaceOrder,
    CancelOrder,
    GetOrder,
    OpenOrders,
    Account,
    Positions,
    LatestPrice,
    FundingRate,
    Klines,
    OrderStream,
    KlineStream,
}

#[derive(Default)]
struct MockState {
    open_orders: Vec<CanonicalOrder>,
    orders: HashMap<String, CanonicalOrder>,
    positions: Vec<CanonicalPosition>,
    account: CanonicalAccount,
    prices: HashMap<String, f64>,
    failures: HashMap<MockCall, GridError>,
    calls: HashMap<MockCall, usize>,
    placed: Vec<OrderRequest>,
    canceled: Vec<String>,
    next_id: u64,
    now: u64,
    order_callback: Option<OrderEventCallback>,
    market_callback: Option<MarketEventCallback>,
}

pub struct MockAdapter {
    name: String,
    mapper: SymbolMapper,
    markets: HashMap<String, MarketMeta>,
    state: Mutex<MockState>,
}

impl MockAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mapper: SymbolMapper::new(SymbolStyle::Concatenated),
            markets: HashMap::new(),
            state: Mutex::new(MockState { now: 1, ..MockState::default() }),
        }
    }

    pub fn with_market(mut self, meta: MarketMeta) -> Self {
        self.markets.insert(meta.symbol.clone(), meta);
        self
    }

    // -- Scripting --

    /// Replace the open-order list. Each order is also reachable by `get_order`.
    pub fn set_open_orders(&self, orders: Vec<CanonicalOrder>) {
        let mut state = self.state.lock();
        for order in &orders {
            state.orders.insert(order.order_id.clone(), order.clone());
        }
        state.open_orders = orders;
    }

    /// Make `order` the `get_order` answer for its id, removing it from the
    /// open list when terminal.
    pub fn set_order(&self, order: CanonicalOrder) {
        let mut state = self.state.lock();
        if order.status.is_terminal() {
            state.open_orders.retain(|o| o.order_id != order.order_id);
        }
        state.orders.insert(order.order_id.clone(), order);
    }

    /// Forget an order entirely so `get_order` answers not-found.
    pub fn forget_order(&self, order_id: &str) {
        let mut state = self.state.lock();
        state.open_orders.retain(|o| o.order_id != order_id);
        state.orders.remove(order_id);
    }

    pub fn set_positions(&self, positions: Vec<CanonicalPosition>) {
        self.state.lock().positions = positions;
    }

    pub fn set_account(&self, account: CanonicalAccount) {
        self.state.lock().account = account;
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.state.lock().prices.insert(symbol.to_string(), price);
    }

    /// Timestamp stamped on placed and canceled orders.
    pub fn set_now(&self, now: u64) {
        self.state.lock().now = now;
    }

    /// Fail every `call` with `error` until [`clear_failure`](Self::clear_failure).
    pub fn fail(&self, call: MockCall, error: GridError) {
        self.state.lock().failures.insert(call, error);
    }

    pub fn clear_failure(&self, call: MockCall) {
        self.state.lock().failures.remove(&call);
    }

    // -- Inspection --

    pub fn placed(&self) -> Vec<OrderRequest> {
        self.state.lock().placed.clone()
    }

    pub fn canceled(&self) -> Vec<String> {
        self.state.lock().canceled.clone()
    }

    pub fn open_orders(&self) -> Vec<CanonicalOrder> {
        self.state.lock().open_orders.clone()
    }

    pub fn call_count(&self, call: MockCall) -> usize {
        self.state.lock().calls.get(&call).copied().unwrap_or(0)
    }

    pub fn order_stream_running(&self) -> bool {
        self.state.lock().order_callback.is_some()
    }

    // -- Stream injection --

    /// Deliver `event` to the registered order-stream callback, if any.
    pub fn emit_order(&self, event: OrderEvent) -> bool {
        let callback = self.state.lock().order_callback.clone();
        callback.map(|cb| cb(event)).is_some()
    }

    pub fn emit_market(&self, event: MarketEvent) -> bool {
        let callback = self.state.lock().market_callback.clone();
        callback.map(|cb| cb(event)).is_some()
    }

    fn enter(&self, call: MockCall) -> GridResult<parking_lot::MutexGuard<'_, MockState>> {
        let mut state = self.state.lock();
        *state.calls.entry(call).or_default() += 1;
        if let Some(err) = state.failures.get(&call).cloned() {
            return Err(err);
        }
        Ok(state)
    }
}

#[async_trait]
impl ExchangeAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn market(&self, symbol: &str) -> MarketMeta {
        self.markets.get(symbol).cloned().unwrap_or_else(|| {
            let (base, quote) = self.mapper.split(symbol);
            MarketMeta::fallback(symbol, &base, &quote)
        })
    }

    async fn place_order(&self, request: &OrderRequest) -> GridResult<CanonicalOrder> {
        let meta = self.market(&request.symbol);
        let mut state = self.enter(MockCall::PlaceOrder)?;
        state.next_id += 1;
        let order = CanonicalOrder {
            order_id: format!("mock-{}", state.next_id),
            client_order_id: request.client_order_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            price: meta.round_price(request.price),
            quantity: meta.round_quantity(request.quantity),
            filled_quantity: 0.0,
            status: OrderStatus::New,
            reduce_only: request.reduce_only,
            update_time: state.now,
        };
        state.placed.push(request.clone());
        state.open_orders.push(order.clone());
        state.orders.insert(order.order_id.clone(), order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> GridResult<()> {
        let mut state = self.enter(MockCall::CancelOrder)?;
        let now = state.now;
        let Some(order) = state.orders.get_mut(order_id) else {
            return Err(GridError::OrderNotFound(order_id.to_string()));
        };
        order.status = OrderStatus::Canceled;
        order.update_time = now;
        state.open_orders.retain(|o| o.order_id != order_id);
        state.canceled.push(order_id.to_string());
        Ok(())
    }

    async fn get_order(&self, _symbol: &str, order_id: &str) -> GridResult<CanonicalOrder> {
        let state = self.enter(MockCall::GetOrder)?;
        state.orders.get(order_id).cloned().ok_or_else(|| GridError::OrderNotFound(order_id.to_string()))
    }

    async fn get_open_orders(&self, symbol: &str) -> GridResult<Vec<CanonicalOrder>> {
        let state = self.enter(MockCall::OpenOrders)?;
        Ok(state.open_orders.iter().filter(|o| o.symbol == symbol).cloned().collect())
    }

    async fn get_account(&self) -> GridResult<CanonicalAccount> {
        Ok(self.enter(MockCall::Account)?.account)
    }

    async fn get_positions(&self, symbol: Option<&str>) -> GridResult<Vec<CanonicalPosition>> {
        let state = self.enter(MockCall::Positions)?;
        Ok(state.positions.iter().filter(|p| symbol.is_none_or(|s| p.symbol == s)).cloned().collect())
    }

    async fn get_latest_price(&self, symbol: &str) -> GridResult<f64> {
        let state = self.enter(MockCall::LatestPrice)?;
        state.prices.get(symbol).copied().ok_or_else(|| GridError::Decode(format!("no price for {symbol}")))
    }

    async fn get_funding_rate(&self, symbol: &str) -> GridResult<FundingRate> {
        self.enter(MockCall::FundingRate)?;
        Ok(FundingRate { symbol: symbol.to_string(), rate: 0.0, next_settle_time: None })
    }

    async fn get_klines(&self, _symbol: &str, _interval: KlineInterval, _limit: usize) -> GridResult<Vec<Kline>> {
        self.enter(MockCall::Klines)?;
        Ok(Vec::new())
    }

    async fn start_order_stream(&self, callback: OrderEventCallback) -> GridResult<()> {
        let mut state = self.enter(MockCall::OrderStream)?;
        if state.order_callback.is_some() {
            return Err(GridError::StreamAlreadyRunning("mock-private".into()));
        }
        state.order_callback = Some(callback);
        Ok(())
    }

    async fn stop_order_stream(&self) {
        self.state.lock().order_callback = None;
    }

    async fn start_kline_stream(
        &self,
        _symbols: &[String],
        _interval: KlineInterval,
        callback: MarketEventCallback,
    ) -> GridResult<()> {
        let mut state = self.enter(MockCall::KlineStream)?;
        if state.market_callback.is_some() {
            return Err(GridError::StreamAlreadyRunning("mock-public".into()));
        }
        state.market_callback = Some(callback);
        Ok(())
    }

    async fn stop_kline_stream(&self) {
        self.state.lock().market_callback = None;
    }
}
