//! MEXC USDT-margined perpetual futures adapter.
//!
//! Venue symbols use an underscore (`BTC_USDT`), requests are signed with a
//! hex HMAC and both the private and public channels share one edge endpoint.
//! Contract precision is discovered at connect time; any symbol whose
//! discovery fails or times out trades with the default precision.

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
    CanonicalAccount, CanonicalOrder, CanonicalPosition, Credentials, FundingRate, GridResult, Kline, KlineInterval,
    MarketMeta, OrderRequest,
};

use self::config::{MexcSettings, interval_token};
use self::rest::MexcRestClient;
use self::stream::MexcStreamProtocol;
use crate::signer::{SignatureEncoding, Signer};
use crate::stream::{StreamSettings, StreamSlot};
use crate::symbol_mapper::{DEFAULT_QUOTE, SymbolMapper, SymbolStyle};
use crate::{ExchangeAdapter, MarketEvent, MarketEventCallback, OrderEvent, OrderEventCallback};

pub struct MexcAdapter {
    settings: MexcSettings,
    signer: Signer,
    rest: MexcRestClient,
    markets: HashMap<String, MarketMeta>,
    streams: StreamSettings,
    order_stream: StreamSlot,
    kline_stream: StreamSlot,
    clock: Clock,
}

impl MexcAdapter {
    /// Build the adapter and run best-effort contract discovery.
    pub async fn connect(config: &AccountConfig) -> GridResult<Self> {
        let settings = MexcSettings::from_account(config)?;
        let mut adapter = Self::new(settings, &config.credentials, StreamSettings::from_account(config))?;
        adapter.discover_markets(&config.symbol_names()).await;
        Ok(adapter)
    }

    /// Build the adapter without touching the network.
    pub fn new(settings: MexcSettings, credentials: &Credentials, streams: StreamSettings) -> GridResult<Self> {
        let signer = Signer::new(credentials, SignatureEncoding::Hex)?;
        let rest = MexcRestClient::new(
            signer.clone(),
            &settings.rest_url,
            settings.request_timeout,
            SymbolMapper::new(SymbolStyle::Underscore),
        )?;
        Ok(Self {
            settings,
            signer,
            rest,
            markets: HashMap::new(),
            streams,
            order_stream: StreamSlot::new("mexc-private"),
            kline_stream: StreamSlot::new("mexc-public"),
            clock: system_clock(),
        })
    }

    /// Replace the timestamp source used for signing.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.rest = self.rest.with_timestamp_fn(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    /// Fetch contract precision for `symbols`, each bounded by the discovery
    /// timeout. Failures keep the defaults.
    pub async fn discover_markets(&mut self, symbols: &[String]) {
        for symbol in symbols {
            match tokio::time::timeout(self.settings.discovery_timeout, self.rest.get_exchange_info(symbol)).await {
                Ok(Ok(meta)) => {
                    info!(
                        "[mexc] {symbol}: price_decimals={} quantity_decimals={}",
                        meta.price_decimals, meta.quantity_decimals
                    );
                    self.markets.insert(symbol.clone(), meta);
                }
                Ok(Err(e)) => warn!("[mexc] {symbol}: contract discovery failed, using defaults: {e}"),
                Err(_) => warn!("[mexc] {symbol}: contract discovery timed out, using defaults"),
            }
        }
    }

    pub fn rest(&self) -> &MexcRestClient {
        &self.rest
    }
}

#[async_trait]
impl ExchangeAdapter for MexcAdapter {
    fn name(&self) -> &str {
        "mexc"
    }

    fn market(&self, symbol: &str) -> MarketMeta {
        self.markets.get(symbol).cloned().unwrap_or_else(|| {
            let (base, quote) = self.rest.mapper().split(symbol);
            MarketMeta::fallback(symbol, &base, &quote)
        })
    }

    async fn place_order(&self, request: &OrderRequest) -> GridResult<CanonicalOrder> {
        let meta = self.market(&request.symbol);
        self.rest.place_order(request, &meta, self.settings.leverage).await
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> GridResult<()> {
        self.rest.cancel_order(order_id).await
    }

    async fn get_order(&self, _symbol: &str, order_id: &str) -> GridResult<CanonicalOrder> {
        self.rest.get_order(order_id).await
    }

    async fn get_open_orders(&self, symbol: &str) -> GridResult<Vec<CanonicalOrder>> {
        self.rest.get_open_orders(symbol).await
    }

    async fn get_account(&self) -> GridResult<CanonicalAccount> {
        let quote = self.markets.values().next().map_or(DEFAULT_QUOTE, |m| m.quote_asset.as_str());
        self.rest.get_account(quote).await
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
        let protocol = MexcStreamProtocol::private(&self.settings.ws_url, self.signer.clone(), Arc::clone(&self.clock));
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
        let protocol = MexcStreamProtocol::public(&self.settings.ws_url, &venue, interval_token(interval));
        let handler = market_frame_handler(self.rest.mapper().clone(), callback);
        self.kline_stream.start(&self.streams, Arc::new(protocol), handler).await
    }

    async fn stop_kline_stream(&self) {
        self.kline_stream.stop().await;
    }
}

fn split_push(frame: &Value) -> Option<(&str, &Value)> {
    Some((frame.get("channel")?.as_str()?, frame.get("data")?))
}

fn order_frame_handler(mapper: SymbolMapper, callback: OrderEventCallback) -> FrameCallback {
    Arc::new(move |frame: &Value| {
        let Some((channel, data)) = split_push(frame) else {
            return;
        };
        let event = match channel {
            "push.personal.order" => parse::parse_order(data, &mapper).map(OrderEvent::Order),
            "push.personal.position" => parse::parse_position(data, &mapper).map(OrderEvent::Position),
            _ => return,
        };
        match event {
            Some(event) => callback(event),
            None => warn!("[mexc-private] unparseable {channel} push: {data}"),
        }
    })
}

fn market_frame_handler(mapper: SymbolMapper, callback: MarketEventCallback) -> FrameCallback {
    Arc::new(move |frame: &Value| {
        let Some((channel, data)) = split_push(frame) else {
            return;
        };
        let event = match channel {
            "push.ticker" => parse::parse_ticker(data, &mapper).map(MarketEvent::Ticker),
            "push.kline" => parse::parse_kline_push(data, &mapper).map(MarketEvent::Kline),
            _ => return,
        };
        match event {
            Some(event) => callback(event),
            None => warn!("[mexc-public] unparseable {channel} push: {data}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use parking_lot::Mutex;
    use serde_json::json;

    use grid_core::time_util::fixed_clock;
    use grid_core::ws::{Dialer, SessionConfig, WsLink};
    use grid_core::{GridError, OrderStatus, Side};

    use super::*;

    const TS: u64 = 1_700_000_000_000;

    fn adapter(base_url: &str) -> MexcAdapter {
        let settings = MexcSettings { rest_url: base_url.to_string(), ..MexcSettings::default() };
        MexcAdapter::new(settings, &Credentials::new("key", "secret"), StreamSettings::default())
            .unwrap()
            .with_clock(fixed_clock(TS))
    }

    fn buy_request() -> OrderRequest {
        OrderRequest {
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            price: 50_000.0,
            quantity: 1.0,
            client_order_id: "grid-ab12cd-b-5000000-1".into(),
            reduce_only: false,
        }
    }

    #[tokio::test]
    async fn place_order_translates_symbol_both_ways() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/private/order/submit")
                    .header("ApiKey", "key")
                    .header("Request-Time", "1700000000000")
                    .body_contains("\"symbol\":\"BTC_USDT\"")
                    .body_contains("\"side\":1")
                    .body_contains("\"externalOid\":\"grid-ab12cd-b-5000000-1\"");
                then.status(200).body(r#"{"success":true,"code":0,"data":"739113577038255616"}"#);
            })
            .await;

        let order = adapter(&server.base_url()).place_order(&buy_request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(order.symbol, "BTCUSDT");
        assert_eq!(order.order_id, "739113577038255616");
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.price, 50_000.0);
        assert_eq!(order.update_time, TS);
    }

    #[tokio::test]
    async fn signed_get_signs_sorted_query() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/private/order/list/open_orders/BTC_USDT")
                    .query_param("page_num", "1")
                    .query_param("page_size", "100")
                    .header("Signature", "b35bdbac2cb6b72b0da64aa05d3cecaa430ef00348c678a7be77b865d0ab665a");
                then.status(200).body(
                    r#"{"success":true,"code":0,"data":[
                        {"orderId":"1","symbol":"BTC_USDT","side":4,"price":"50100","vol":"2","dealVol":"0.5",
                         "state":2,"externalOid":"grid-x-s-5000000-2","updateTime":1700000000100},
                        {"orderId":"2","symbol":"BTC_USDT","side":9}
                    ]}"#,
                );
            })
            .await;

        let orders = adapter(&server.base_url()).get_open_orders("BTCUSDT").await.unwrap();

        mock.assert_async().await;
        assert_eq!(orders.len(), 1);
        let order = &orders[0];
        assert_eq!(order.side, Side::Sell);
        assert!(order.reduce_only);
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.filled_quantity, 0.5);
    }

    #[tokio::test]
    async fn failed_envelope_on_http_200_is_api_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/private/order/submit");
                then.status(200).body(r#"{"success":false,"code":2005,"message":"balance insufficient"}"#);
            })
            .await;

        let err = adapter(&server.base_url()).place_order(&buy_request()).await.unwrap_err();
        match err {
            GridError::Api { code, message } => {
                assert_eq!(code, "2005");
                assert_eq!(message, "balance insufficient");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_order_is_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/private/order/get/42");
                then.status(200).body(r#"{"success":false,"code":2040,"message":"order not exist"}"#);
            })
            .await;

        let err = adapter(&server.base_url()).get_order("BTCUSDT", "42").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn cancel_surfaces_per_order_error_code() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/private/order/cancel").body("[\"42\"]");
                then.status(200)
                    .body(r#"{"success":true,"code":0,"data":[{"orderId":"42","errorCode":2040,"errorMsg":"order not exist"}]}"#);
            })
            .await;

        let err = adapter(&server.base_url()).cancel_order("BTCUSDT", "42").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn non_json_error_body_carries_http_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/contract/ticker");
                then.status(502).body("<html>bad gateway</html>");
            })
            .await;

        let err = adapter(&server.base_url()).get_latest_price("BTCUSDT").await.unwrap_err();
        assert!(matches!(err, GridError::Api { ref code, .. } if code == "502"));
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        let err = adapter("http://127.0.0.1:1").get_account().await.unwrap_err();
        assert!(err.is_transport(), "{err:?}");
    }

    #[tokio::test]
    async fn discovery_sets_precision_and_failures_fall_back() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/contract/detail").query_param("symbol", "BTC_USDT");
                then.status(200).body(
                    r#"{"success":true,"code":0,"data":{"symbol":"BTC_USDT","baseCoin":"BTC","quoteCoin":"USDT","priceScale":1,"volScale":0}}"#,
                );
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/contract/detail").query_param("symbol", "ETH_USDT");
                then.status(500).body("oops");
            })
            .await;

        let mut adapter = adapter(&server.base_url());
        adapter.discover_markets(&["BTCUSDT".into(), "ETHUSDT".into()]).await;

        assert_eq!(adapter.price_decimals("BTCUSDT"), 1);
        assert_eq!(adapter.quantity_decimals("BTCUSDT"), 0);
        assert_eq!(adapter.price_decimals("ETHUSDT"), 2);
        assert_eq!(adapter.quantity_decimals("ETHUSDT"), 3);
        assert_eq!(adapter.base_asset("ETHUSDT"), "ETH");
    }

    #[tokio::test]
    async fn klines_are_fetched_by_window() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/contract/kline/BTC_USDT")
                    .query_param("interval", "Min1")
                    .query_param("start", "1699999880")
                    .query_param("end", "1700000000");
                then.status(200).body(
                    r#"{"success":true,"code":0,"data":{"time":[1699999880,1699999940,1700000000],
                        "open":[1,2,3],"high":[1,2,3],"low":[1,2,3],"close":[1,2,3],"vol":[5,6,7]}}"#,
                );
            })
            .await;

        let klines = adapter(&server.base_url()).get_klines("BTCUSDT", KlineInterval::M1, 2).await.unwrap();

        mock.assert_async().await;
        assert_eq!(klines.len(), 2);
        assert_eq!(klines[0].open_time, 1_699_999_940_000);
        assert_eq!(klines[1].close, 3.0);
    }

    #[test]
    fn testnet_without_override_is_rejected() {
        let config: AccountConfig = serde_json::from_value(json!({
            "name": "m", "exchange": "mexc", "api_key": "k", "secret_key": "s", "testnet": true,
            "symbols": [{"symbol": "BTCUSDT", "price_interval": 10.0, "window_size": 2, "order_quantity": 1.0}]
        }))
        .unwrap();
        assert!(matches!(MexcSettings::from_account(&config), Err(GridError::Config(_))));
    }

    #[test]
    fn order_pushes_reach_the_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = order_frame_handler(
            SymbolMapper::new(SymbolStyle::Underscore),
            Arc::new(move |event: OrderEvent| sink.lock().push(event)),
        );

        handler(&json!({"channel": "push.personal.order", "data": {
            "orderId": "7", "symbol": "BTC_USDT", "side": 1, "price": 50000, "vol": 1, "dealVol": 1, "state": 3,
            "externalOid": "grid-x-b-5000000-1", "updateTime": TS
        }}));
        handler(&json!({"channel": "push.personal.asset", "data": {}}));
        handler(&json!({
            "channel": "push.personal.position",
            "data": {"symbol": "BTC_USDT", "holdVol": 1, "positionType": 1}
        }));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(matches!(&seen[0], OrderEvent::Order(o) if o.status == OrderStatus::Filled && o.symbol == "BTCUSDT"));
        assert!(matches!(&seen[1], OrderEvent::Position(p) if p.size == 1.0));
    }

    struct RefusingDialer;

    #[async_trait]
    impl Dialer for RefusingDialer {
        async fn dial(&self, _url: &str) -> GridResult<WsLink> {
            Err(GridError::Transport("refused".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_order_stream_is_rejected_until_stopped() {
        let streams = StreamSettings {
            session: SessionConfig { backoff: Duration::from_secs(1), ..SessionConfig::default() },
            dialer: Arc::new(RefusingDialer),
        };
        let adapter = MexcAdapter::new(MexcSettings::default(), &Credentials::new("key", "secret"), streams).unwrap();
        let noop: OrderEventCallback = Arc::new(|_: OrderEvent| {});

        adapter.start_order_stream(Arc::clone(&noop)).await.unwrap();
        let err = adapter.start_order_stream(Arc::clone(&noop)).await.unwrap_err();
        assert!(matches!(err, GridError::StreamAlreadyRunning(_)));

        adapter.stop_order_stream().await;
        adapter.stop_order_stream().await;
        adapter.start_order_stream(noop).await.unwrap();
        adapter.stop_order_stream().await;
        adapter.stop_kline_stream().await;
    }
}
