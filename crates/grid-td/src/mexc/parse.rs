//! MEXC wire format → canonical model.
//!
//! Side codes: 1 open long, 2 close short, 3 open short, 4 close long.
//! Order states: 1 pending, 2 uncompleted, 3 completed, 4 canceled, 5 invalid.

use serde_json::Value;

use grid_core::{
    CanonicalAccount, CanonicalOrder, CanonicalPosition, FundingRate, Kline, KlineInterval, MarketMeta, OrderStatus,
    Side, Ticker,
};

use super::config::interval_from_token;
use crate::json_util::{first_f64, id_field, parse_f64_field, parse_str_i64, parse_str_u64};
use crate::symbol_mapper::SymbolMapper;

/// Order `side` code for a grid order.
pub fn side_code(side: Side, reduce_only: bool) -> u8 {
    match (side, reduce_only) {
        (Side::Buy, false) => 1,
        (Side::Buy, true) => 2,
        (Side::Sell, false) => 3,
        (Side::Sell, true) => 4,
    }
}

fn side_from_code(code: i64) -> Option<Side> {
    match code {
        1 | 2 => Some(Side::Buy),
        3 | 4 => Some(Side::Sell),
        _ => None,
    }
}

fn status_from_state(state: i64, filled: f64) -> Option<OrderStatus> {
    match state {
        1 => Some(OrderStatus::New),
        2 if filled > 0.0 => Some(OrderStatus::PartiallyFilled),
        2 => Some(OrderStatus::New),
        3 => Some(OrderStatus::Filled),
        4 => Some(OrderStatus::Canceled),
        5 => Some(OrderStatus::Rejected),
        _ => None,
    }
}

/// Parse an order object (REST `order/get`, open orders, `push.personal.order`).
pub fn parse_order(v: &Value, mapper: &SymbolMapper) -> Option<CanonicalOrder> {
    let side_code = parse_str_i64(v.get("side"))?;
    let filled = parse_f64_field(v, "dealVol").unwrap_or(0.0);
    Some(CanonicalOrder {
        order_id: id_field(v, "orderId")?,
        client_order_id: id_field(v, "externalOid").unwrap_or_default(),
        symbol: mapper.to_canonical(v.get("symbol")?.as_str()?),
        side: side_from_code(side_code)?,
        price: parse_f64_field(v, "price").unwrap_or(0.0),
        quantity: parse_f64_field(v, "vol")?,
        filled_quantity: filled,
        status: status_from_state(parse_str_i64(v.get("state"))?, filled)?,
        reduce_only: matches!(side_code, 2 | 4),
        update_time: parse_str_u64(v.get("updateTime")).or_else(|| parse_str_u64(v.get("createTime"))).unwrap_or(0),
    })
}

/// Parse a position object. Closed positions (`state == 3`) report size zero.
pub fn parse_position(v: &Value, mapper: &SymbolMapper) -> Option<CanonicalPosition> {
    let hold = parse_f64_field(v, "holdVol").unwrap_or(0.0);
    let sign = match parse_str_i64(v.get("positionType")) {
        Some(2) => -1.0,
        _ => 1.0,
    };
    let closed = parse_str_i64(v.get("state")) == Some(3);
    Some(CanonicalPosition {
        symbol: mapper.to_canonical(v.get("symbol")?.as_str()?),
        size: if closed { 0.0 } else { sign * hold },
        entry_price: first_f64(v, &["holdAvgPrice", "openAvgPrice"]).unwrap_or(0.0),
        mark_price: first_f64(v, &["markPrice", "fairPrice"]).unwrap_or(0.0),
        unrealized_pnl: first_f64(v, &["unrealisedPnl", "unrealized"]).unwrap_or(0.0),
        leverage: parse_f64_field(v, "leverage").unwrap_or(0.0),
    })
}

/// Pick the `quote` asset row out of `account/assets`.
pub fn parse_account(data: &Value, quote: &str) -> CanonicalAccount {
    let Some(row) = data
        .as_array()
        .and_then(|rows| rows.iter().find(|r| r.get("currency").and_then(Value::as_str) == Some(quote)))
    else {
        return CanonicalAccount::default();
    };
    CanonicalAccount {
        total_wallet_balance: parse_f64_field(row, "cashBalance").unwrap_or(0.0),
        total_margin_balance: parse_f64_field(row, "equity").unwrap_or(0.0),
        available_balance: parse_f64_field(row, "availableBalance").unwrap_or(0.0),
    }
}

/// Parse `contract/ticker` data or a `push.ticker` payload.
pub fn parse_ticker(v: &Value, mapper: &SymbolMapper) -> Option<Ticker> {
    Some(Ticker {
        symbol: mapper.to_canonical(v.get("symbol")?.as_str()?),
        last_price: parse_f64_field(v, "lastPrice")?,
        funding_rate: parse_f64_field(v, "fundingRate"),
        timestamp: parse_str_u64(v.get("timestamp")).unwrap_or(0),
    })
}

pub fn parse_funding_rate(v: &Value, mapper: &SymbolMapper) -> Option<FundingRate> {
    Some(FundingRate {
        symbol: mapper.to_canonical(v.get("symbol")?.as_str()?),
        rate: parse_f64_field(v, "fundingRate")?,
        next_settle_time: parse_str_u64(v.get("nextSettleTime")),
    })
}

/// Parse the column-oriented `contract/kline` response. Times are seconds.
pub fn parse_kline_columns(data: &Value, symbol: &str, interval: KlineInterval) -> Vec<Kline> {
    let column = |name: &str| data.get(name).and_then(Value::as_array).cloned().unwrap_or_default();
    let (time, open, high, low, close, vol) =
        (column("time"), column("open"), column("high"), column("low"), column("close"), column("vol"));

    time.iter()
        .enumerate()
        .filter_map(|(i, t)| {
            Some(Kline {
                symbol: symbol.to_string(),
                interval,
                open_time: parse_str_u64(Some(t))? * 1_000,
                open: crate::json_util::parse_str_f64(open.get(i))?,
                high: crate::json_util::parse_str_f64(high.get(i))?,
                low: crate::json_util::parse_str_f64(low.get(i))?,
                close: crate::json_util::parse_str_f64(close.get(i))?,
                volume: crate::json_util::parse_str_f64(vol.get(i)).unwrap_or(0.0),
            })
        })
        .collect()
}

/// Parse a `push.kline` payload.
pub fn parse_kline_push(v: &Value, mapper: &SymbolMapper) -> Option<Kline> {
    Some(Kline {
        symbol: mapper.to_canonical(v.get("symbol")?.as_str()?),
        interval: interval_from_token(v.get("interval")?.as_str()?)?,
        open_time: parse_str_u64(v.get("t"))? * 1_000,
        open: parse_f64_field(v, "o")?,
        high: parse_f64_field(v, "h")?,
        low: parse_f64_field(v, "l")?,
        close: parse_f64_field(v, "c")?,
        volume: first_f64(v, &["q", "a"]).unwrap_or(0.0),
    })
}

/// Parse `contract/detail` into contract precision.
pub fn parse_contract(v: &Value, mapper: &SymbolMapper) -> Option<MarketMeta> {
    let venue = v.get("symbol")?.as_str()?;
    Some(MarketMeta {
        symbol: mapper.to_canonical(venue),
        base_asset: v.get("baseCoin")?.as_str()?.to_string(),
        quote_asset: v.get("quoteCoin")?.as_str()?.to_string(),
        price_decimals: parse_str_u64(v.get("priceScale"))? as u32,
        quantity_decimals: parse_str_u64(v.get("volScale")).unwrap_or(0) as u32,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::symbol_mapper::SymbolStyle;

    fn mapper() -> SymbolMapper {
        SymbolMapper::new(SymbolStyle::Underscore)
    }

    #[test]
    fn order_states_map_to_canonical() {
        let raw = json!({
            "orderId": "739113577038255616", "symbol": "BTC_USDT", "side": 1, "price": 50000,
            "vol": 2, "dealVol": 0, "state": 2, "externalOid": "grid-ab12cd-b-5000000-1",
            "createTime": 1700000000000u64, "updateTime": 1700000000500u64
        });
        let order = parse_order(&raw, &mapper()).unwrap();
        assert_eq!(order.symbol, "BTCUSDT");
        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.status, OrderStatus::New);
        assert!(!order.reduce_only);
        assert_eq!(order.update_time, 1_700_000_000_500);

        let mut partial = raw.clone();
        partial["dealVol"] = json!(1);
        assert_eq!(parse_order(&partial, &mapper()).unwrap().status, OrderStatus::PartiallyFilled);

        let mut closing = raw.clone();
        closing["side"] = json!(4);
        closing["state"] = json!(3);
        let order = parse_order(&closing, &mapper()).unwrap();
        assert_eq!(order.side, Side::Sell);
        assert!(order.reduce_only);
        assert_eq!(order.status, OrderStatus::Filled);

        let mut invalid = raw;
        invalid["state"] = json!(5);
        assert_eq!(parse_order(&invalid, &mapper()).unwrap().status, OrderStatus::Rejected);
    }

    #[test]
    fn side_codes_round_trip() {
        for side in [Side::Buy, Side::Sell] {
            for reduce in [false, true] {
                assert_eq!(side_from_code(side_code(side, reduce) as i64), Some(side));
            }
        }
    }

    #[test]
    fn short_position_is_negative() {
        let raw =
            json!({"symbol": "ETH_USDT", "holdVol": 3, "positionType": 2, "holdAvgPrice": 3000.5, "leverage": 20});
        let pos = parse_position(&raw, &mapper()).unwrap();
        assert_eq!(pos.symbol, "ETHUSDT");
        assert_eq!(pos.size, -3.0);
        assert_eq!(pos.entry_price, 3000.5);
        assert_eq!(pos.leverage, 20.0);
    }

    #[test]
    fn account_picks_quote_row() {
        let data = json!([
            {"currency": "BTC", "cashBalance": 1, "equity": 1, "availableBalance": 1},
            {"currency": "USDT", "cashBalance": 1000.5, "equity": 1010, "availableBalance": 800}
        ]);
        let account = parse_account(&data, "USDT");
        assert_eq!(account.total_wallet_balance, 1000.5);
        assert_eq!(account.total_margin_balance, 1010.0);
        assert_eq!(account.available_balance, 800.0);
        assert_eq!(parse_account(&data, "USDC"), CanonicalAccount::default());
    }

    #[test]
    fn kline_columns_are_zipped() {
        let data = json!({
            "time": [1700000000, 1700000060],
            "open": [1.0, 2.0], "high": [1.5, 2.5], "low": [0.5, 1.5], "close": [1.2, 2.2], "vol": [10, 20]
        });
        let klines = parse_kline_columns(&data, "BTCUSDT", KlineInterval::M1);
        assert_eq!(klines.len(), 2);
        assert_eq!(klines[1].open_time, 1_700_000_060_000);
        assert_eq!(klines[1].close, 2.2);
    }

    #[test]
    fn kline_push_uses_interval_table() {
        let raw = json!({
            "symbol": "BTC_USDT", "interval": "Min5", "t": 1700000000,
            "o": 1, "h": 2, "l": 0.5, "c": 1.5, "q": 42
        });
        let kline = parse_kline_push(&raw, &mapper()).unwrap();
        assert_eq!(kline.interval, KlineInterval::M5);
        assert_eq!(kline.volume, 42.0);
    }
}
