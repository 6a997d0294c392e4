//! Bitget USDT-M futures adapter (V2 mix API).
//!
//! Symbols are already canonical (`BTCUSDT`). Every request needs the
//! account passphrase, so construction fails without one. Demo accounts use
//! the `wspap` WebSocket hosts and tag REST calls with `paptrading: 1`.

pub mod config;
pub mod parse;
pub mod rest;
pub mod stream;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use grid_core::config::AccountConfig;
use grid_core::time_util::{Clock, system_clock};
use grid_core::ws::FrameCallback;
use grid_core::{
    CanonicalAccount, CanonicalOrder, CanonicalPosition, Credentials, FundingRate, GridError, GridResult, Kline,
    KlineInterval, MarketMeta, OrderRequest,
};

use self::config::{BitgetSettings, MARGIN_COIN, candle_channel, interval_from_channel};
use self::rest::BitgetRestClient;
use self::stream::BitgetStreamProtocol;
use crate::signer::{SignatureEncoding, Signer};
use crate::stream::{StreamSettings, StreamSlot};
use crate::symbol_mapper::{SymbolMapper, SymbolStyle};
use crate::{ExchangeAdapter, MarketEvent, MarketEventCallback, OrderEvent, OrderEventCallback};

pub struct BitgetAdapter {
    settings: BitgetSettings,
    signer: Signer,
    passphrase: String,
    rest: BitgetRestClient,
    markets: HashMap<String, MarketMeta>,
    streams: StreamSettings,
    order_stream: StreamSlot,
    kline_stream: StreamSlot,
    clock: Clock,
}

impl BitgetAdapter {
    pub async fn connect(config: &AccountConfig) -> GridResult<Self> {
        let settings = BitgetSettings::from_account(config)?;
        let mut adapter = Self::new(settings, &config.credentials, StreamSettings::from_account(config))?;
        adapter.discover_markets(&config.symbol_names()).await;
        Ok(adapter)
    }

    pub fn new(settings: BitgetSettings, credentials: &Credentials, streams: StreamSettings) -> GridResult<Self> {
        let passphrase = credentials
            .passphrase
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| GridError::Config("bitget requires a passphrase".into()))?;
        let signer = Signer::new(credentials, SignatureEncoding::Base64)?;
        let rest = BitgetRestClient::new(
            signer.clone(),
            &passphrase,
            &settings.rest_url,
            settings.request_timeout,
            settings.demo,
            SymbolMapper::new(SymbolStyle::Concatenated),
        )?;
        Ok(Self {
            settings,
            signer,
            passphrase,
            rest,
            markets: HashMap::new(),
            streams,
            order_stream: StreamSlot::new("bitget-private"),
            kline_stream: StreamSlot::new("bitget-public"),
            clock: system_clock(),
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.rest = self.rest.with_timestamp_fn(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    pub async fn discover_markets(&mut self, symbols: &[String]) {
        for symbol in symbols {
            match tokio::time::timeout(self.settings.discovery_timeout, self.rest.get_exchange_info(symbol)).await {
                Ok(Ok(meta)) => {
                    info!(
                        "[bitget] {symbol}: price_decimals={} quantity_decimals={}",
                        meta.price_decimals, meta.quantity_decimals
                    );
                    self.markets.insert(symbol.clone(), meta);
                }
                Ok(Err(e)) => warn!("[bitget] {symbol}: contract discovery failed, using defaults: {e}"),
                Err(_) => warn!("[bitget] {symbol}: contract discovery timed out, using defaults"),
            }
        }
    }
}

#[async_trait]
impl ExchangeAdapter for BitgetAdapter {
    fn name(&self) -> &str {
        "bitget"
    }

    fn market(&self, symbol: &str) -> MarketMeta {
        self.markets.get(symbol).cloned().unwrap_or_else(|| {
            let (base, quote) = self.rest.mapper().split(symbol);
            MarketMeta::fallback(symbol, &base, &quote)
        })
    }

    async fn place_order(&self, request: &OrderRequest) -> GridResult<CanonicalOrder> {
        let meta = self.market(&request.symbol);
        self.rest.place_order(request, &meta).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> GridResult<()> {
        self.rest.cancel_order(symbol, order_id).await
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> GridResult<CanonicalOrder> {
        self.rest.get_order(symbol, order_id).await
    }

    async fn get_open_orders(&self, symbol: &str) -> GridResult<Vec<CanonicalOrder>> {
        self.rest.get_open_orders(symbol).await
    }

    async fn get_account(&self) -> GridResult<CanonicalAccount> {
        self.rest.get_account(MARGIN_COIN).await
    }

    async fn get_positions(&self, symbol: Option<&str>) -> GridResult<Vec<CanonicalPosition>> {
        self.rest.get_positions(symbol).await
    }

    async fn get_latest_price(&self, symbol: &str) -> GridResult<f64> {
        Ok(self.rest.get_ticker(symbol).await?.last_price)
    }

    async fn get_funding_rate(&self, symbol: &str) -> GridResult<FundingRate> {
        self.rest.get_funding_rate(symbol).await
    }

    async fn get_klines(&self, symbol: &str, interval: KlineInterval, limit: usize) -> GridResult<Vec<Kline>> {
        self.rest.get_klines(symbol, interval, limit).await
    }

    async fn start_order_stream(&self, callback: OrderEventCallback) -> GridResult<()> {
        let protocol = BitgetStreamProtocol::private(
            &self.settings.ws_private_url,
            self.signer.clone(),
            &self.passphrase,
            Arc::clone(&self.clock),
        );
        let handler = order_frame_handler(self.rest.mapper().clone(), callback);
        self.order_stream.start(&self.streams, Arc::new(protocol), handler).await
    }

    async fn stop_order_stream(&self) {
        self.order_stream.stop().await;
    }

    async fn start_kline_stream(
        &self,
        symbols: &[String],
        interval: KlineInterval,
        callback: MarketEventCallback,
    ) -> GridResult<()> {
        let venue: Vec<String> = symbols.iter().map(|s| self.rest.mapper().to_venue(s)).collect();
        let protocol = BitgetStreamProtocol::public(&self.settings.ws_public_url, &venue, &candle_channel(interval));
        let handler = market_frame_handler(self.rest.mapper().clone(), callback);
        self.kline_stream.start(&self.streams, Arc::new(protocol), handler).await
    }

    async fn stop_kline_stream(&self) {
        self.kline_stream.stop().await;
    }
}

/// `(arg.channel, arg.instId, data rows)` of a push.
fn split_push(frame: &Value) -> Option<(&str, Option<&str>, &[Value])> {
    let channel = frame.pointer("/arg/channel")?.as_str()?;
    let inst_id = frame.pointer("/arg/instId").and_then(Value::as_str);
    Some((channel, inst_id, frame.get("data")?.as_array()?.as_slice()))
}

fn order_frame_handler(mapper: SymbolMapper, callback: OrderEventCallback) -> FrameCallback {
    Arc::new(move |frame: &Value| {
        let Some((channel, _, rows)) = split_push(frame) else {
            return;
        };
        for row in rows {
            let event = match channel {
                "orders" => parse::parse_order(row, &mapper).map(OrderEvent::Order),
                "positions" => parse::parse_position(row, &mapper).map(OrderEvent::Position),
                _ => return,
            };
            match event {
                Some(event) => callback(event),
                None => warn!("[bitget-private] unparseable {channel} row: {row}"),
            }
        }
    })
}

fn market_frame_handler(mapper: SymbolMapper, callback: MarketEventCallback) -> FrameCallback {
    Arc::new(move |frame: &Value| {
        let Some((channel, inst_id, rows)) = split_push(frame) else {
            return;
        };
        for row in rows {
            let event = if channel == "ticker" {
                parse::parse_ticker(row, &mapper).map(MarketEvent::Ticker)
            } else if let (Some(interval), Some(inst_id)) = (interval_from_channel(channel), inst_id) {
                parse::parse_candle(row, &mapper.to_canonical(inst_id), interval).map(MarketEvent::Kline)
            } else {
                return;
            };
            match event {
                Some(event) => callback(event),
                None => warn!("[bitget-public] unparseable {channel} row: {row}"),
            }
        }
    })
}
