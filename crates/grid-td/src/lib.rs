//! # grid-td
//!
//! Exchange adapters for the grid slot sync system.
//!
//! Each exchange implements the [`ExchangeAdapter`] trait, which puts one REST
//! client and the exchange's stream sessions behind a uniform capability
//! interface and translates venue symbols, enums and envelopes into the
//! canonical model from `grid-core`.
//!
//! ## Supported exchanges
//!
//! | Exchange | Module   | Venue symbol | Signature     | Kline token |
//! |----------|----------|--------------|---------------|-------------|
//! | MEXC     | `mexc`   | `BTC_USDT`   | HMAC hex      | `Min1`      |
//! | Bitget   | `bitget` | `BTCUSDT`    | HMAC base64   | `1m`        |

pub mod bitget;
pub mod json_util;
pub mod mexc;
pub mod mock;
pub mod registry;
pub mod signer;
pub mod stream;
pub mod symbol_mapper;

use std::sync::Arc;

use async_trait::async_trait;
use grid_core::{
    CanonicalAccount, CanonicalOrder, CanonicalPosition, FundingRate, GridResult, Kline, KlineInterval, MarketMeta,
    OrderRequest, Ticker,
};

/// Private-stream event delivered to [`ExchangeAdapter::start_order_stream`] callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    Order(CanonicalOrder),
    Position(CanonicalPosition),
}

/// Public-stream event delivered to [`ExchangeAdapter::start_kline_stream`] callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Ticker(Ticker),
    Kline(Kline),
}

/// Callback for private order/position events. Runs on the stream's read loop.
pub type OrderEventCallback = Arc<dyn Fn(OrderEvent) + Send + Sync>;

/// Callback for public ticker/kline events. Runs on the stream's read loop.
pub type MarketEventCallback = Arc<dyn Fn(MarketEvent) + Send + Sync>;

/// Trait implemented by all exchange adapters.
///
/// # Lifecycle
///
/// 1. Construct via the exchange-specific `connect(config)`, which performs
///    best-effort contract discovery and never blocks startup on it.
/// 2. Use the REST operations from any number of tasks (`&self`).
/// 3. Start at most one order stream and one kline stream at a time.
/// 4. Call the `stop_*` methods during shutdown; they are safe to call even
///    when the stream was never started.
///
/// Symbols are always canonical (`BTCUSDT`) on both sides of this trait.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Exchange identifier (e.g. `"mexc"`).
    fn name(&self) -> &str;

    /// Contract metadata, or safe defaults when discovery failed.
    fn market(&self, symbol: &str) -> MarketMeta;

    fn price_decimals(&self, symbol: &str) -> u32 {
        self.market(symbol).price_decimals
    }

    fn quantity_decimals(&self, symbol: &str) -> u32 {
        self.market(symbol).quantity_decimals
    }

    fn base_asset(&self, symbol: &str) -> String {
        self.market(symbol).base_asset
    }

    fn quote_asset(&self, symbol: &str) -> String {
        self.market(symbol).quote_asset
    }

    /// Submit a limit order. Returns the order as acknowledged by the venue.
    async fn place_order(&self, request: &OrderRequest) -> GridResult<CanonicalOrder>;

    /// Cancel an order by exchange id.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> GridResult<()>;

    /// Fetch one order by exchange id, including terminal ones.
    async fn get_order(&self, symbol: &str, order_id: &str) -> GridResult<CanonicalOrder>;

    async fn get_open_orders(&self, symbol: &str) -> GridResult<Vec<CanonicalOrder>>;

    async fn get_account(&self) -> GridResult<CanonicalAccount>;

    /// Open positions, optionally restricted to one symbol.
    async fn get_positions(&self, symbol: Option<&str>) -> GridResult<Vec<CanonicalPosition>>;

    async fn get_latest_price(&self, symbol: &str) -> GridResult<f64>;

    async fn get_funding_rate(&self, symbol: &str) -> GridResult<FundingRate>;

    async fn get_klines(&self, symbol: &str, interval: KlineInterval, limit: usize) -> GridResult<Vec<Kline>>;

    /// Start the private order/position stream.
    ///
    /// Returns [`GridError::StreamAlreadyRunning`](grid_core::GridError::StreamAlreadyRunning)
    /// while a previous stream is active.
    async fn start_order_stream(&self, callback: OrderEventCallback) -> GridResult<()>;

    async fn stop_order_stream(&self);

    /// Start the public ticker + kline stream for `symbols`.
    async fn start_kline_stream(
        &self,
        symbols: &[String],
        interval: KlineInterval,
        callback: MarketEventCallback,
    ) -> GridResult<()>;

    async fn stop_kline_stream(&self);
}
