//! Bitget wire format → canonical model.
//!
//! REST and WS spell the same order differently (`symbol` vs `instId`,
//! `state` vs `status`, `baseVolume` vs `accBaseVolume`); every parser
//! accepts both.

use serde_json::Value;

use grid_core::{
    CanonicalAccount, CanonicalOrder, CanonicalPosition, FundingRate, Kline, KlineInterval, MarketMeta, OrderStatus,
    Side, Ticker,
};

use crate::json_util::{first_f64, id_field, parse_f64_field, parse_str_f64, parse_str_u64};
use crate::symbol_mapper::SymbolMapper;

fn first_str<'a>(v: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| v.get(*k).and_then(Value::as_str))
}

fn symbol_of(v: &Value, mapper: &SymbolMapper) -> Option<String> {
    first_str(v, &["symbol", "instId"]).map(|s| mapper.to_canonical(s))
}

fn status_of(raw: &str) -> Option<OrderStatus> {
    match raw {
        "init" | "new" | "live" => Some(OrderStatus::New),
        "partially_filled" => Some(OrderStatus::PartiallyFilled),
        "filled" => Some(OrderStatus::Filled),
        "canceled" | "cancelled" => Some(OrderStatus::Canceled),
        _ => None,
    }
}

pub fn parse_order(v: &Value, mapper: &SymbolMapper) -> Option<CanonicalOrder> {
    let side = match first_str(v, &["side"])? {
        "buy" => Side::Buy,
        "sell" => Side::Sell,
        _ => return None,
    };
    Some(CanonicalOrder {
        order_id: id_field(v, "orderId")?,
        client_order_id: id_field(v, "clientOid").unwrap_or_default(),
        symbol: symbol_of(v, mapper)?,
        side,
        price: parse_f64_field(v, "price").unwrap_or(0.0),
        quantity: parse_f64_field(v, "size")?,
        filled_quantity: first_f64(v, &["baseVolume", "accBaseVolume"]).unwrap_or(0.0),
        status: status_of(first_str(v, &["state", "status"])?)?,
        reduce_only: first_str(v, &["reduceOnly"]).is_some_and(|r| r.eq_ignore_ascii_case("yes")),
        update_time: parse_str_u64(v.get("uTime")).or_else(|| parse_str_u64(v.get("cTime"))).unwrap_or(0),
    })
}

pub fn parse_position(v: &Value, mapper: &SymbolMapper) -> Option<CanonicalPosition> {
    let total = parse_f64_field(v, "total").unwrap_or(0.0);
    let sign = if first_str(v, &["holdSide"]) == Some("short") { -1.0 } else { 1.0 };
    Some(CanonicalPosition {
        symbol: symbol_of(v, mapper)?,
        size: sign * total,
        entry_price: first_f64(v, &["openPriceAvg", "averageOpenPrice"]).unwrap_or(0.0),
        mark_price: parse_f64_field(v, "markPrice").unwrap_or(0.0),
        unrealized_pnl: parse_f64_field(v, "unrealizedPL").unwrap_or(0.0),
        leverage: parse_f64_field(v, "leverage").unwrap_or(0.0),
    })
}

/// Pick the `quote` margin-coin row out of `account/accounts`.
pub fn parse_account(data: &Value, quote: &str) -> CanonicalAccount {
    let Some(row) = data
        .as_array()
        .and_then(|rows| rows.iter().find(|r| first_str(r, &["marginCoin"]) == Some(quote)))
    else {
        return CanonicalAccount::default();
    };
    let equity = first_f64(row, &["accountEquity", "usdtEquity"]).unwrap_or(0.0);
    let unrealized = parse_f64_field(row, "unrealizedPL").unwrap_or(0.0);
    CanonicalAccount {
        total_wallet_balance: equity - unrealized,
        total_margin_balance: equity,
        available_balance: first_f64(row, &["available", "crossedMaxAvailable"]).unwrap_or(0.0),
    }
}

pub fn parse_ticker(v: &Value, mapper: &SymbolMapper) -> Option<Ticker> {
    Some(Ticker {
        symbol: symbol_of(v, mapper)?,
        last_price: parse_f64_field(v, "lastPr")?,
        funding_rate: parse_f64_field(v, "fundingRate"),
        timestamp: parse_str_u64(v.get("ts")).unwrap_or(0),
    })
}

pub fn parse_funding_rate(v: &Value, mapper: &SymbolMapper) -> Option<FundingRate> {
    Some(FundingRate {
        symbol: symbol_of(v, mapper)?,
        rate: parse_f64_field(v, "fundingRate")?,
        next_settle_time: parse_str_u64(v.get("nextUpdate")),
    })
}

/// One candle row: `[ts, open, high, low, close, baseVol, ...]`, all strings.
pub fn parse_candle(row: &Value, symbol: &str, interval: KlineInterval) -> Option<Kline> {
    let cols = row.as_array()?;
    Some(Kline {
        symbol: symbol.to_string(),
        interval,
        open_time: parse_str_u64(cols.first())?,
        open: parse_str_f64(cols.get(1))?,
        high: parse_str_f64(cols.get(2))?,
        low: parse_str_f64(cols.get(3))?,
        close: parse_str_f64(cols.get(4))?,
        volume: parse_str_f64(cols.get(5)).unwrap_or(0.0),
    })
}

pub fn parse_contract(v: &Value, mapper: &SymbolMapper) -> Option<MarketMeta> {
    Some(MarketMeta {
        symbol: symbol_of(v, mapper)?,
        base_asset: first_str(v, &["baseCoin"])?.to_string(),
        quote_asset: first_str(v, &["quoteCoin"])?.to_string(),
        price_decimals: parse_str_u64(v.get("pricePlace"))? as u32,
        quantity_decimals: parse_str_u64(v.get("volumePlace")).unwrap_or(0) as u32,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::symbol_mapper::SymbolStyle;

    fn mapper() -> SymbolMapper {
        SymbolMapper::new(SymbolStyle::Concatenated)
    }

    #[test]
    fn rest_and_ws_order_spellings_agree() {
        let rest = json!({
            "orderId": "1", "clientOid": "grid-x-b-5000000-1", "symbol": "BTCUSDT", "side": "buy",
            "price": "50000", "size": "0.01", "baseVolume": "0.005", "state": "partially_filled",
            "reduceOnly": "NO", "uTime": "1700000000100"
        });
        let ws = json!({
            "orderId": "1", "clientOid": "grid-x-b-5000000-1", "instId": "BTCUSDT", "side": "buy",
            "price": "50000", "size": "0.01", "accBaseVolume": "0.005", "status": "partially_filled",
            "reduceOnly": "no", "uTime": "1700000000100"
        });
        let a = parse_order(&rest, &mapper()).unwrap();
        let b = parse_order(&ws, &mapper()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.status, OrderStatus::PartiallyFilled);
        assert_eq!(a.filled_quantity, 0.005);
        assert!(!a.reduce_only);
    }

    #[test]
    fn unknown_state_is_rejected() {
        let raw = json!({"orderId": "1", "symbol": "BTCUSDT", "side": "buy", "size": "1", "state": "weird"});
        assert!(parse_order(&raw, &mapper()).is_none());
    }

    #[test]
    fn account_wallet_excludes_unrealized() {
        let data = json!([{"marginCoin": "USDT", "accountEquity": "1100", "unrealizedPL": "100", "available": "900"}]);
        let account = parse_account(&data, "USDT");
        assert_eq!(account.total_wallet_balance, 1000.0);
        assert_eq!(account.total_margin_balance, 1100.0);
        assert_eq!(account.available_balance, 900.0);
    }

    #[test]
    fn candle_rows_are_positional() {
        let row = json!(["1700000000000", "1", "2", "0.5", "1.5", "10", "15"]);
        let kline = parse_candle(&row, "BTCUSDT", KlineInterval::M1).unwrap();
        assert_eq!(kline.open_time, 1_700_000_000_000);
        assert_eq!(kline.low, 0.5);
        assert_eq!(kline.volume, 10.0);
    }
}
