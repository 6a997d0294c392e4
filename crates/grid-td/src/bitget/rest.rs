//! Bitget V2 mix REST client.
//!
//! # REST endpoints
//!
//! | Operation      | Method | Path                                   |
//! |----------------|--------|----------------------------------------|
//! | Place order    | POST   | `/api/v2/mix/order/place-order`        |
//! | Cancel order   | POST   | `/api/v2/mix/order/cancel-order`       |
//! | Order detail   | GET    | `/api/v2/mix/order/detail`             |
//! | Open orders    | GET    | `/api/v2/mix/order/orders-pending`     |
//! | Accounts       | GET    | `/api/v2/mix/account/accounts`         |
//! | Positions      | GET    | `/api/v2/mix/position/all-position`    |
//! | Ticker         | GET    | `/api/v2/mix/market/ticker`            |
//! | Funding rate   | GET    | `/api/v2/mix/market/current-fund-rate` |
//! | Candles        | GET    | `/api/v2/mix/market/candles`           |
//! | Contracts      | GET    | `/api/v2/mix/market/contracts`         |
//!
//! Signature: base64 HMAC of `timestamp + METHOD + path[?query] + body`,
//! sent in `ACCESS-SIGN` next to `ACCESS-KEY`, `ACCESS-TIMESTAMP` and
//! `ACCESS-PASSPHRASE`. Successful envelopes carry `code == "00000"`.

use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde_json::{Value, json};
use tracing::{debug, warn};

use grid_core::time_util::{Clock, system_clock};
use grid_core::{
    CanonicalAccount, CanonicalOrder, CanonicalPosition, FundingRate, GridError, GridResult, Kline, KlineInterval,
    MarketMeta, OrderRequest, OrderStatus, Ticker,
};

use super::config::{MARGIN_COIN, ORDER_NOT_FOUND_CODES, PRODUCT_TYPE, SUCCESS_CODE, interval_token};
use super::parse;
use crate::json_util::id_field;
use crate::signer::{Signer, canonical_query};
use crate::symbol_mapper::SymbolMapper;

pub struct BitgetRestClient {
    http: reqwest::Client,
    signer: Signer,
    passphrase: String,
    base_url: String,
    demo: bool,
    mapper: SymbolMapper,
    timestamp_fn: Clock,
}

impl BitgetRestClient {
    pub fn new(
        signer: Signer,
        passphrase: &str,
        base_url: &str,
        timeout: Duration,
        demo: bool,
        mapper: SymbolMapper,
    ) -> GridResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GridError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            signer,
            passphrase: passphrase.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            demo,
            mapper,
            timestamp_fn: system_clock(),
        })
    }

    pub fn with_timestamp_fn(mut self, timestamp_fn: Clock) -> Self {
        self.timestamp_fn = timestamp_fn;
        self
    }

    pub fn mapper(&self) -> &SymbolMapper {
        &self.mapper
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    pub async fn place_order(&self, request: &OrderRequest, meta: &MarketMeta) -> GridResult<CanonicalOrder> {
        let venue_symbol = self.mapper.to_venue(&request.symbol);
        let body = json!({
            "symbol": venue_symbol,
            "productType": PRODUCT_TYPE,
            "marginMode": "crossed",
            "marginCoin": MARGIN_COIN,
            "size": meta.format_quantity(request.quantity),
            "price": meta.format_price(request.price),
            "side": request.side.as_str(),
            "orderType": "limit",
            "force": "gtc",
            "clientOid": request.client_order_id,
            "reduceOnly": if request.reduce_only { "YES" } else { "NO" },
        });
        let data = self.signed(Method::POST, "/api/v2/mix/order/place-order", &[], Some(&body)).await?;
        let order_id =
            id_field(&data, "orderId").ok_or_else(|| GridError::Decode(format!("place-order returned no id: {data}")))?;

        debug!("[bitget-rest] placed {} {} id={order_id}", request.symbol, request.side);
        Ok(CanonicalOrder {
            order_id,
            client_order_id: request.client_order_id.clone(),
            symbol: self.mapper.to_canonical(&venue_symbol),
            side: request.side,
            price: meta.round_price(request.price),
            quantity: meta.round_quantity(request.quantity),
            filled_quantity: 0.0,
            status: OrderStatus::New,
            reduce_only: request.reduce_only,
            update_time: (self.timestamp_fn)(),
        })
    }

    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> GridResult<()> {
        let body = json!({
            "symbol": self.mapper.to_venue(symbol),
            "productType": PRODUCT_TYPE,
            "marginCoin": MARGIN_COIN,
            "orderId": order_id,
        });
        self.signed(Method::POST, "/api/v2/mix/order/cancel-order", &[], Some(&body)).await?;
        Ok(())
    }

    pub async fn get_order(&self, symbol: &str, order_id: &str) -> GridResult<CanonicalOrder> {
        let params = [
            ("symbol", self.mapper.to_venue(symbol)),
            ("productType", PRODUCT_TYPE.to_string()),
            ("orderId", order_id.to_string()),
        ];
        let data = self.signed(Method::GET, "/api/v2/mix/order/detail", &params, None).await?;
        if data.is_null() {
            return Err(GridError::OrderNotFound(order_id.to_string()));
        }
        parse::parse_order(&data, &self.mapper).ok_or_else(|| GridError::Decode(format!("order {order_id}: {data}")))
    }

    pub async fn get_open_orders(&self, symbol: &str) -> GridResult<Vec<CanonicalOrder>> {
        let params = [("productType", PRODUCT_TYPE.to_string()), ("symbol", self.mapper.to_venue(symbol))];
        let data = self.signed(Method::GET, "/api/v2/mix/order/orders-pending", &params, None).await?;
        // `entrustedList` is null when nothing is open.
        Ok(self.parse_list(data.get("entrustedList").unwrap_or(&Value::Null), parse::parse_order))
    }

    // -----------------------------------------------------------------------
    // Account
    // -----------------------------------------------------------------------

    pub async fn get_account(&self, quote_asset: &str) -> GridResult<CanonicalAccount> {
        let params = [("productType", PRODUCT_TYPE.to_string())];
        let data = self.signed(Method::GET, "/api/v2/mix/account/accounts", &params, None).await?;
        Ok(parse::parse_account(&data, quote_asset))
    }

    pub async fn get_positions(&self, symbol: Option<&str>) -> GridResult<Vec<CanonicalPosition>> {
        let params = [("productType", PRODUCT_TYPE.to_string()), ("marginCoin", MARGIN_COIN.to_string())];
        let data = self.signed(Method::GET, "/api/v2/mix/position/all-position", &params, None).await?;
        let mut positions = self.parse_list(&data, parse::parse_position);
        if let Some(symbol) = symbol {
            positions.retain(|p| p.symbol == symbol);
        }
        Ok(positions)
    }

    // -----------------------------------------------------------------------
    // Market data
    // -----------------------------------------------------------------------

    pub async fn get_ticker(&self, symbol: &str) -> GridResult<Ticker> {
        let data = self.public_get("/api/v2/mix/market/ticker", &self.symbol_params(symbol)).await?;
        first_row(&data)
            .and_then(|row| parse::parse_ticker(row, &self.mapper))
            .ok_or_else(|| GridError::Decode(format!("ticker {symbol}: {data}")))
    }

    pub async fn get_funding_rate(&self, symbol: &str) -> GridResult<FundingRate> {
        let data = self.public_get("/api/v2/mix/market/current-fund-rate", &self.symbol_params(symbol)).await?;
        first_row(&data)
            .and_then(|row| parse::parse_funding_rate(row, &self.mapper))
            .ok_or_else(|| GridError::Decode(format!("funding rate {symbol}: {data}")))
    }

    /// The most recent `limit` candles, oldest first.
    pub async fn get_klines(&self, symbol: &str, interval: KlineInterval, limit: usize) -> GridResult<Vec<Kline>> {
        let mut params = self.symbol_params(symbol);
        params.push(("granularity", interval_token(interval).to_string()));
        params.push(("limit", limit.to_string()));
        let data = self.public_get("/api/v2/mix/market/candles", &params).await?;
        let mut klines: Vec<Kline> = data
            .as_array()
            .map(|rows| rows.iter().filter_map(|row| parse::parse_candle(row, symbol, interval)).collect())
            .unwrap_or_default();
        klines.sort_by_key(|k| k.open_time);
        Ok(klines)
    }

    pub async fn get_exchange_info(&self, symbol: &str) -> GridResult<MarketMeta> {
        let data = self.public_get("/api/v2/mix/market/contracts", &self.symbol_params(symbol)).await?;
        first_row(&data)
            .and_then(|row| parse::parse_contract(row, &self.mapper))
            .ok_or_else(|| GridError::Decode(format!("contract {symbol}: {data}")))
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    fn symbol_params(&self, symbol: &str) -> Vec<(&'static str, String)> {
        vec![("symbol", self.mapper.to_venue(symbol)), ("productType", PRODUCT_TYPE.to_string())]
    }

    fn parse_list<T>(&self, data: &Value, parse: impl Fn(&Value, &SymbolMapper) -> Option<T>) -> Vec<T> {
        let Some(rows) = data.as_array() else {
            return Vec::new();
        };
        rows.iter()
            .filter_map(|row| {
                let parsed = parse(row, &self.mapper);
                if parsed.is_none() {
                    warn!("[bitget-rest] skipping unparseable row: {row}");
                }
                parsed
            })
            .collect()
    }

    fn request_path(path: &str, query: &str) -> String {
        if query.is_empty() { path.to_string() } else { format!("{path}?{query}") }
    }

    async fn public_get(&self, path: &str, params: &[(&str, String)]) -> GridResult<Value> {
        let url = format!("{}{}", self.base_url, Self::request_path(path, &canonical_query(params)));
        self.execute(self.with_demo(self.http.get(url)), path).await
    }

    async fn signed(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&Value>,
    ) -> GridResult<Value> {
        let request_path = Self::request_path(path, &canonical_query(params));
        let body = body.map(Value::to_string).unwrap_or_default();
        let timestamp = (self.timestamp_fn)().to_string();
        let prehash = format!("{timestamp}{}{request_path}{body}", method.as_str());

        let mut builder = self
            .http
            .request(method, format!("{}{request_path}", self.base_url))
            .header("ACCESS-KEY", self.signer.api_key())
            .header("ACCESS-SIGN", self.signer.sign_payload(&prehash))
            .header("ACCESS-TIMESTAMP", timestamp)
            .header("ACCESS-PASSPHRASE", &self.passphrase)
            .header("Content-Type", "application/json")
            .header("locale", "en-US");
        if !body.is_empty() {
            builder = builder.body(body);
        }
        self.execute(self.with_demo(builder), path).await
    }

    fn with_demo(&self, builder: RequestBuilder) -> RequestBuilder {
        if self.demo { builder.header("paptrading", "1") } else { builder }
    }

    async fn execute(&self, builder: RequestBuilder, path: &str) -> GridResult<Value> {
        let resp = builder.send().await.map_err(|e| GridError::Transport(format!("{path}: {e}")))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| GridError::Transport(format!("{path}: {e}")))?;
        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(e) if status.is_success() => return Err(GridError::Decode(format!("{path}: {e}"))),
            Err(_) => return Err(GridError::api(status.as_u16(), text.chars().take(200).collect::<String>())),
        };
        unwrap_envelope(body).inspect_err(|e| warn!("[bitget-rest] {path} failed: {e}"))
    }
}

fn first_row(data: &Value) -> Option<&Value> {
    match data {
        Value::Array(rows) => rows.first(),
        Value::Object(_) => Some(data),
        _ => None,
    }
}

/// Return `data` of a `"00000"` envelope or the mapped error. Bitget also
/// uses non-2xx statuses with a JSON envelope, which land here too.
pub(crate) fn unwrap_envelope(mut body: Value) -> GridResult<Value> {
    let code = match body.get("code") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if code == SUCCESS_CODE {
        return Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null));
    }
    let message = body.get("msg").and_then(Value::as_str).unwrap_or("unknown error").to_string();
    if ORDER_NOT_FOUND_CODES.contains(&code.as_str()) {
        return Err(GridError::OrderNotFound(message));
    }
    Err(GridError::Api { code, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_codes() {
        assert_eq!(unwrap_envelope(json!({"code": "00000", "data": {"a": 1}})).unwrap(), json!({"a": 1}));
        let err = unwrap_envelope(json!({"code": "40768", "msg": "Order does not exist"})).unwrap_err();
        assert!(err.is_not_found());
        let err = unwrap_envelope(json!({"code": "40762", "msg": "balance"})).unwrap_err();
        assert!(matches!(err, GridError::Api { ref code, .. } if code == "40762"));
    }

    #[test]
    fn first_row_accepts_array_or_object() {
        assert_eq!(first_row(&json!([{"a": 1}])), Some(&json!({"a": 1})));
        assert_eq!(first_row(&json!({"a": 1})), Some(&json!({"a": 1})));
        assert_eq!(first_row(&json!([])), None);
    }
}
