//! MEXC futures REST client.
//!
//! # REST endpoints
//!
//! | Operation      | Method | Path                                             |
//! |----------------|--------|--------------------------------------------------|
//! | Place order    | POST   | `/api/v1/private/order/submit`                   |
//! | Cancel order   | POST   | `/api/v1/private/order/cancel`                   |
//! | Order detail   | GET    | `/api/v1/private/order/get/{orderId}`            |
//! | Open orders    | GET    | `/api/v1/private/order/list/open_orders/{symbol}`|
//! | Assets         | GET    | `/api/v1/private/account/assets`                 |
//! | Positions      | GET    | `/api/v1/private/position/open_positions`        |
//! | Ticker         | GET    | `/api/v1/contract/ticker`                        |
//! | Funding rate   | GET    | `/api/v1/contract/funding_rate/{symbol}`         |
//! | Klines         | GET    | `/api/v1/contract/kline/{symbol}`                |
//! | Contract info  | GET    | `/api/v1/contract/detail`                        |
//!
//! Private calls carry `ApiKey`, `Request-Time` and `Signature` headers. The
//! signature is the hex HMAC of `apiKey + timestamp + paramString`, where
//! `paramString` is the sorted query for GET and the raw JSON body for POST.
//!
//! Every response is wrapped in `{success, code, message, data}`; a failed
//! envelope becomes [`GridError::Api`] even on HTTP 200.

use std::sync::Arc;
use std::time::Duration;

use reqwest::RequestBuilder;
use serde_json::{Value, json};
use tracing::{debug, warn};

use grid_core::time_util::{Clock, system_clock};
use grid_core::{
    CanonicalAccount, CanonicalOrder, CanonicalPosition, FundingRate, GridError, GridResult, Kline, KlineInterval,
    MarketMeta, OrderRequest, OrderStatus, Ticker,
};

use super::config::{ORDER_NOT_FOUND_CODES, OPEN_TYPE_CROSS, ORDER_TYPE_LIMIT, interval_token};
use super::parse;
use crate::json_util::{id_field, parse_str_i64};
use crate::signer::{Signer, canonical_query};
use crate::symbol_mapper::SymbolMapper;

const OPEN_ORDERS_PAGE_SIZE: &str = "100";

pub struct MexcRestClient {
    http: reqwest::Client,
    signer: Signer,
    base_url: String,
    mapper: SymbolMapper,
    timestamp_fn: Clock,
}

impl MexcRestClient {
    pub fn new(signer: Signer, base_url: &str, timeout: Duration, mapper: SymbolMapper) -> GridResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GridError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            signer,
            base_url: base_url.trim_end_matches('/').to_string(),
            mapper,
            timestamp_fn: system_clock(),
        })
    }

    /// Replace the request timestamp source (milliseconds).
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

    /// Submit a limit order. `meta` supplies the contract precision.
    pub async fn place_order(
        &self,
        request: &OrderRequest,
        meta: &MarketMeta,
        leverage: u32,
    ) -> GridResult<CanonicalOrder> {
        let venue_symbol = self.mapper.to_venue(&request.symbol);
        let price = meta.round_price(request.price);
        let quantity = meta.round_quantity(request.quantity);
        let body = json!({
            "symbol": venue_symbol,
            "price": price,
            "vol": quantity,
            "side": parse::side_code(request.side, request.reduce_only),
            "type": ORDER_TYPE_LIMIT,
            "openType": OPEN_TYPE_CROSS,
            "leverage": leverage,
            "externalOid": request.client_order_id,
        });
        let data = self.signed_post("/api/v1/private/order/submit", &body).await?;
        let order_id = match &data {
            Value::Object(_) => id_field(&data, "orderId"),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
        .ok_or_else(|| GridError::Decode(format!("order submit returned no id: {data}")))?;

        debug!("[mexc-rest] placed {} {} {}@{} id={order_id}", request.symbol, request.side, quantity, price);
        Ok(CanonicalOrder {
            order_id,
            client_order_id: request.client_order_id.clone(),
            symbol: self.mapper.to_canonical(&venue_symbol),
            side: request.side,
            price,
            quantity,
            filled_quantity: 0.0,
            status: OrderStatus::New,
            reduce_only: request.reduce_only,
            update_time: (self.timestamp_fn)(),
        })
    }

    /// Cancel by exchange id. The batch endpoint reports per-order failures in
    /// `errorCode`, which are surfaced like envelope errors.
    pub async fn cancel_order(&self, order_id: &str) -> GridResult<()> {
        let data = self.signed_post("/api/v1/private/order/cancel", &json!([order_id])).await?;
        let Some(row) = data.as_array().and_then(|rows| rows.first()) else {
            return Ok(());
        };
        match parse_str_i64(row.get("errorCode")) {
            None | Some(0) => Ok(()),
            Some(code) => {
                let message = row.get("errorMsg").and_then(Value::as_str).unwrap_or("cancel failed").to_string();
                Err(classify_error(code, message))
            }
        }
    }

    pub async fn get_order(&self, order_id: &str) -> GridResult<CanonicalOrder> {
        let path = format!("/api/v1/private/order/get/{order_id}");
        let data = self.signed_get(&path, &[]).await?;
        if data.is_null() {
            return Err(GridError::OrderNotFound(order_id.to_string()));
        }
        parse::parse_order(&data, &self.mapper).ok_or_else(|| GridError::Decode(format!("order {order_id}: {data}")))
    }

    pub async fn get_open_orders(&self, symbol: &str) -> GridResult<Vec<CanonicalOrder>> {
        let path = format!("/api/v1/private/order/list/open_orders/{}", self.mapper.to_venue(symbol));
        let params = [("page_num", "1".to_string()), ("page_size", OPEN_ORDERS_PAGE_SIZE.to_string())];
        let data = self.signed_get(&path, &params).await?;
        Ok(self.parse_list(&data, parse::parse_order))
    }

    // -----------------------------------------------------------------------
    // Account
    // -----------------------------------------------------------------------

    pub async fn get_account(&self, quote_asset: &str) -> GridResult<CanonicalAccount> {
        let data = self.signed_get("/api/v1/private/account/assets", &[]).await?;
        Ok(parse::parse_account(&data, quote_asset))
    }

    pub async fn get_positions(&self, symbol: Option<&str>) -> GridResult<Vec<CanonicalPosition>> {
        let params: Vec<(&str, String)> =
            symbol.map(|s| vec![("symbol", self.mapper.to_venue(s))]).unwrap_or_default();
        let data = self.signed_get("/api/v1/private/position/open_positions", &params).await?;
        Ok(self.parse_list(&data, parse::parse_position))
    }

    // -----------------------------------------------------------------------
    // Market data
    // -----------------------------------------------------------------------

    pub async fn get_ticker(&self, symbol: &str) -> GridResult<Ticker> {
        let data = self.public_get("/api/v1/contract/ticker", &[("symbol", self.mapper.to_venue(symbol))]).await?;
        parse::parse_ticker(&data, &self.mapper).ok_or_else(|| GridError::Decode(format!("ticker {symbol}: {data}")))
    }

    pub async fn get_funding_rate(&self, symbol: &str) -> GridResult<FundingRate> {
        let path = format!("/api/v1/contract/funding_rate/{}", self.mapper.to_venue(symbol));
        let data = self.public_get(&path, &[]).await?;
        parse::parse_funding_rate(&data, &self.mapper)
            .ok_or_else(|| GridError::Decode(format!("funding rate {symbol}: {data}")))
    }

    /// The most recent `limit` bars, oldest first.
    pub async fn get_klines(&self, symbol: &str, interval: KlineInterval, limit: usize) -> GridResult<Vec<Kline>> {
        let end = (self.timestamp_fn)() / 1_000;
        let span = interval.duration_ms() / 1_000 * limit as u64;
        let path = format!("/api/v1/contract/kline/{}", self.mapper.to_venue(symbol));
        let params = [
            ("interval", interval_token(interval).to_string()),
            ("start", end.saturating_sub(span).to_string()),
            ("end", end.to_string()),
        ];
        let data = self.public_get(&path, &params).await?;
        let mut klines = parse::parse_kline_columns(&data, symbol, interval);
        if klines.len() > limit {
            klines.drain(..klines.len() - limit);
        }
        Ok(klines)
    }

    /// Contract precision and assets for one symbol.
    pub async fn get_exchange_info(&self, symbol: &str) -> GridResult<MarketMeta> {
        let data = self.public_get("/api/v1/contract/detail", &[("symbol", self.mapper.to_venue(symbol))]).await?;
        let row = match &data {
            Value::Array(rows) => rows.first().cloned().unwrap_or(Value::Null),
            _ => data,
        };
        parse::parse_contract(&row, &self.mapper).ok_or_else(|| GridError::Decode(format!("contract {symbol}: {row}")))
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    fn parse_list<T>(&self, data: &Value, parse: impl Fn(&Value, &SymbolMapper) -> Option<T>) -> Vec<T> {
        let Some(rows) = data.as_array() else {
            return Vec::new();
        };
        rows.iter()
            .filter_map(|row| {
                let parsed = parse(row, &self.mapper);
                if parsed.is_none() {
                    warn!("[mexc-rest] skipping unparseable row: {row}");
                }
                parsed
            })
            .collect()
    }

    fn url(&self, path: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{query}", self.base_url)
        }
    }

    fn auth_headers(&self, builder: RequestBuilder, param_string: &str) -> RequestBuilder {
        let timestamp = (self.timestamp_fn)().to_string();
        let payload = format!("{}{timestamp}{param_string}", self.signer.api_key());
        builder
            .header("ApiKey", self.signer.api_key())
            .header("Request-Time", timestamp)
            .header("Signature", self.signer.sign_payload(&payload))
            .header("Content-Type", "application/json")
    }

    async fn public_get(&self, path: &str, params: &[(&str, String)]) -> GridResult<Value> {
        let url = self.url(path, &canonical_query(params));
        self.execute(self.http.get(url), path).await
    }

    async fn signed_get(&self, path: &str, params: &[(&str, String)]) -> GridResult<Value> {
        let query = canonical_query(params);
        let builder = self.auth_headers(self.http.get(self.url(path, &query)), &query);
        self.execute(builder, path).await
    }

    async fn signed_post(&self, path: &str, body: &Value) -> GridResult<Value> {
        let body = body.to_string();
        let builder = self.auth_headers(self.http.post(self.url(path, "")), &body).body(body);
        self.execute(builder, path).await
    }

    async fn execute(&self, builder: RequestBuilder, path: &str) -> GridResult<Value> {
        let resp = builder.send().await.map_err(|e| GridError::Transport(format!("{path}: {e}")))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| GridError::Transport(format!("{path}: {e}")))?;
        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(e) if status.is_success() => return Err(GridError::Decode(format!("{path}: {e}"))),
            Err(_) => return Err(GridError::api(status.as_u16(), preview(&text))),
        };
        unwrap_envelope(body).inspect_err(|e| warn!("[mexc-rest] {path} failed: {e}"))
    }
}

/// Return `data` of a successful envelope or the mapped error.
pub(crate) fn unwrap_envelope(mut body: Value) -> GridResult<Value> {
    let code = parse_str_i64(body.get("code")).unwrap_or(-1);
    let success = body.get("success").and_then(Value::as_bool).unwrap_or(code == 0);
    if success {
        return Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null));
    }
    let message = body
        .get("message")
        .or_else(|| body.get("msg"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    Err(classify_error(code, message))
}

fn classify_error(code: i64, message: String) -> GridError {
    if ORDER_NOT_FOUND_CODES.contains(&code) {
        GridError::OrderNotFound(message)
    } else {
        GridError::Api { code: code.to_string(), message }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}
