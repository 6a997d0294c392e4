//! Bitget V2 mix (USDT-M futures) configuration table.

use std::time::Duration;

use grid_core::config::AccountConfig;
use grid_core::{GridError, GridResult, KlineInterval};

pub const DEFAULT_REST_URL: &str = "https://api.bitget.com";
pub const WS_PUBLIC_URL: &str = "wss://ws.bitget.com/v2/ws/public";
pub const WS_PRIVATE_URL: &str = "wss://ws.bitget.com/v2/ws/private";
pub const DEMO_WS_PUBLIC_URL: &str = "wss://wspap.bitget.com/v2/ws/public";
pub const DEMO_WS_PRIVATE_URL: &str = "wss://wspap.bitget.com/v2/ws/private";

pub const PRODUCT_TYPE: &str = "USDT-FUTURES";
pub const MARGIN_COIN: &str = "USDT";
pub const SUCCESS_CODE: &str = "00000";

/// Envelope codes mapped to [`GridError::OrderNotFound`].
pub const ORDER_NOT_FOUND_CODES: &[&str] = &["40768", "43001"];

#[derive(Debug, Clone)]
pub struct BitgetSettings {
    pub rest_url: String,
    pub ws_public_url: String,
    pub ws_private_url: String,
    /// Demo trading: demo WS hosts plus the `paptrading: 1` REST header.
    pub demo: bool,
    pub request_timeout: Duration,
    pub discovery_timeout: Duration,
    pub leverage: u32,
}

impl Default for BitgetSettings {
    fn default() -> Self {
        Self {
            rest_url: DEFAULT_REST_URL.into(),
            ws_public_url: WS_PUBLIC_URL.into(),
            ws_private_url: WS_PRIVATE_URL.into(),
            demo: false,
            request_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(5),
            leverage: 10,
        }
    }
}

impl BitgetSettings {
    /// Resolve settings from an account entry. A passphrase is mandatory.
    pub fn from_account(config: &AccountConfig) -> GridResult<Self> {
        if config.credentials.passphrase.as_deref().is_none_or(|p| p.trim().is_empty()) {
            return Err(GridError::Config(format!("{}: bitget requires a passphrase", config.name)));
        }
        let demo = config.credentials.testnet;
        let (public, private) = if demo {
            (DEMO_WS_PUBLIC_URL, DEMO_WS_PRIVATE_URL)
        } else {
            (WS_PUBLIC_URL, WS_PRIVATE_URL)
        };
        Ok(Self {
            rest_url: config.rest_url.clone().unwrap_or_else(|| DEFAULT_REST_URL.into()),
            ws_public_url: config.ws_public_url.clone().unwrap_or_else(|| public.into()),
            ws_private_url: config.ws_private_url.clone().unwrap_or_else(|| private.into()),
            demo,
            request_timeout: config.request_timeout(),
            discovery_timeout: config.discovery_timeout(),
            leverage: config.leverage,
        })
    }
}

/// REST `granularity` token.
pub fn interval_token(interval: KlineInterval) -> &'static str {
    match interval {
        KlineInterval::M1 => "1m",
        KlineInterval::M5 => "5m",
        KlineInterval::M15 => "15m",
        KlineInterval::M30 => "30m",
        KlineInterval::H1 => "1H",
        KlineInterval::H4 => "4H",
        KlineInterval::D1 => "1D",
    }
}

/// WS candle channel name, e.g. `candle1m`.
pub fn candle_channel(interval: KlineInterval) -> String {
    format!("candle{}", interval_token(interval))
}

pub fn interval_from_channel(channel: &str) -> Option<KlineInterval> {
    let token = channel.strip_prefix("candle")?;
    KlineInterval::ALL.into_iter().find(|i| interval_token(*i) == token)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn account(extra: serde_json::Value) -> AccountConfig {
        let mut raw = json!({
            "name": "bg", "exchange": "bitget", "api_key": "k", "secret_key": "s",
            "symbols": [{"symbol": "BTCUSDT", "price_interval": 10.0, "window_size": 2, "order_quantity": 0.01}]
        });
        if let (Some(obj), Some(extra)) = (raw.as_object_mut(), extra.as_object()) {
            obj.extend(extra.clone());
        }
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn passphrase_is_required() {
        assert!(matches!(BitgetSettings::from_account(&account(json!({}))), Err(GridError::Config(_))));
        assert!(BitgetSettings::from_account(&account(json!({"passphrase": "p"}))).is_ok());
    }

    #[test]
    fn demo_switches_ws_hosts() {
        let settings = BitgetSettings::from_account(&account(json!({"passphrase": "p", "testnet": true}))).unwrap();
        assert!(settings.demo);
        assert_eq!(settings.ws_private_url, DEMO_WS_PRIVATE_URL);
        assert_eq!(settings.rest_url, DEFAULT_REST_URL);
    }

    #[test]
    fn candle_channels_round_trip() {
        for interval in KlineInterval::ALL {
            assert_eq!(interval_from_channel(&candle_channel(interval)), Some(interval));
        }
        assert_eq!(candle_channel(KlineInterval::H4), "candle4H");
    }
}
