//! Market data structures delivered by the public stream and REST queries.

use serde::{Deserialize, Serialize};

use super::enums::KlineInterval;

/// Default price precision when contract discovery fails.
pub const DEFAULT_PRICE_DECIMALS: u32 = 2;
/// Default quantity precision when contract discovery fails.
pub const DEFAULT_QUANTITY_DECIMALS: u32 = 3;

/// Last-trade snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    /// Canonical symbol.
    pub symbol: String,
    pub last_price: f64,
    /// Current funding rate when the venue includes it in the ticker.
    pub funding_rate: Option<f64>,
    /// Exchange timestamp (ms).
    pub timestamp: u64,
}

/// One OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    /// Canonical symbol.
    pub symbol: String,
    pub interval: KlineInterval,
    /// Candle open time (ms).
    pub open_time: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Perpetual funding rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    /// Canonical symbol.
    pub symbol: String,
    pub rate: f64,
    /// Next settlement (ms), when reported.
    pub next_settle_time: Option<u64>,
}

/// Contract metadata used to round prices and quantities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketMeta {
    /// Canonical symbol.
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub price_decimals: u32,
    pub quantity_decimals: u32,
}

impl MarketMeta {
    /// Metadata with the safe default precisions.
    pub fn fallback(symbol: &str, base_asset: &str, quote_asset: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            base_asset: base_asset.to_string(),
            quote_asset: quote_asset.to_string(),
            price_decimals: DEFAULT_PRICE_DECIMALS,
            quantity_decimals: DEFAULT_QUANTITY_DECIMALS,
        }
    }

    /// Round `price` to the contract's price precision.
    pub fn round_price(&self, price: f64) -> f64 {
        round_to(price, self.price_decimals)
    }

    /// Round `quantity` to the contract's quantity precision.
    pub fn round_quantity(&self, quantity: f64) -> f64 {
        round_to(quantity, self.quantity_decimals)
    }

    /// Format `price` with exactly `price_decimals` fraction digits.
    pub fn format_price(&self, price: f64) -> String {
        format!("{:.*}", self.price_decimals as usize, price)
    }

    /// Format `quantity` with exactly `quantity_decimals` fraction digits.
    pub fn format_quantity(&self, quantity: f64) -> String {
        format!("{:.*}", self.quantity_decimals as usize, quantity)
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_uses_default_precision() {
        let meta = MarketMeta::fallback("BTCUSDT", "BTC", "USDT");
        assert_eq!(meta.price_decimals, 2);
        assert_eq!(meta.quantity_decimals, 3);
        assert_eq!(meta.format_price(50_000.0), "50000.00");
        assert_eq!(meta.format_quantity(0.1234), "0.123");
    }

    #[test]
    fn rounding_respects_precision() {
        let mut meta = MarketMeta::fallback("ETHUSDT", "ETH", "USDT");
        meta.price_decimals = 1;
        assert_eq!(meta.round_price(3_000.26), 3_000.3);
        assert_eq!(meta.round_quantity(0.0006), 0.001);
    }
}
