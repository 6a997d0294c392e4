//! MEXC futures configuration table.
//!
//! Endpoint defaults, the kline interval token table and the envelope codes
//! that mean "order does not exist".

use std::time::Duration;

use grid_core::config::AccountConfig;
use grid_core::{GridError, GridResult, KlineInterval};

pub const DEFAULT_REST_URL: &str = "https://contract.mexc.com";
pub const DEFAULT_WS_URL: &str = "wss://contract.mexc.com/edge";

/// Envelope codes mapped to [`GridError::OrderNotFound`].
pub const ORDER_NOT_FOUND_CODES: &[i64] = &[2040];

/// `openType` sent with every order: 1 isolated, 2 cross.
pub const OPEN_TYPE_CROSS: u8 = 2;

/// `type` sent with every order: 1 limit.
pub const ORDER_TYPE_LIMIT: u8 = 1;

/// Resolved MEXC adapter settings.
#[derive(Debug, Clone)]
pub struct MexcSettings {
    /// REST base URL.
    pub rest_url: String,
    /// Single WebSocket endpoint serving public and private channels.
    pub ws_url: String,
    /// Bounded timeout for each REST call.
    pub request_timeout: Duration,
    /// Bound on the startup contract discovery.
    pub discovery_timeout: Duration,
    /// Leverage sent with opening orders.
    pub leverage: u32,
}

impl Default for MexcSettings {
    fn default() -> Self {
        Self {
            rest_url: DEFAULT_REST_URL.into(),
            ws_url: DEFAULT_WS_URL.into(),
            request_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(5),
            leverage: 10,
        }
    }
}

impl MexcSettings {
    /// Resolve settings from an account entry.
    ///
    /// MEXC offers no futures testnet; a testnet account must point at an
    /// explicit REST override instead of silently trading on mainnet.
    pub fn from_account(config: &AccountConfig) -> GridResult<Self> {
        if config.credentials.testnet && config.rest_url.is_none() {
            return Err(GridError::Config("mexc has no futures testnet; set rest_url explicitly".into()));
        }
        Ok(Self {
            rest_url: config.rest_url.clone().unwrap_or_else(|| DEFAULT_REST_URL.into()),
            ws_url: config
                .ws_private_url
                .clone()
                .or_else(|| config.ws_public_url.clone())
                .unwrap_or_else(|| DEFAULT_WS_URL.into()),
            request_timeout: config.request_timeout(),
            discovery_timeout: config.discovery_timeout(),
            leverage: config.leverage,
        })
    }
}

/// Kline interval token used by REST and WS.
pub fn interval_token(interval: KlineInterval) -> &'static str {
    match interval {
        KlineInterval::M1 => "Min1",
        KlineInterval::M5 => "Min5",
        KlineInterval::M15 => "Min15",
        KlineInterval::M30 => "Min30",
        KlineInterval::H1 => "Min60",
        KlineInterval::H4 => "Hour4",
        KlineInterval::D1 => "Day1",
    }
}

pub fn interval_from_token(token: &str) -> Option<KlineInterval> {
    KlineInterval::ALL.into_iter().find(|i| interval_token(*i) == token)
}
