//! Configuration parsing for the grid slot sync system.
//!
//! All settings come from a single JSON file read once at startup. There is no
//! live mutation path: changing the ladder requires a restart.
//!
//! # Example config
//!
//! ```json
//! {
//!   "meta": { "module_name": "grid-sync", "log_path": "/var/log/grid" },
//!   "accounts": [{
//!     "name": "main",
//!     "exchange": "mexc",
//!     "api_key": "...", "secret_key": "...",
//!     "symbols": [
//!       { "symbol": "BTCUSDT", "price_interval": 50.0, "window_size": 10, "order_quantity": 1.0 }
//!     ]
//!   }],
//!   "storage": { "reconcile_history_path": "reconcile.jsonl" }
//! }
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::GridError;
use crate::types::{Credentials, KlineInterval};

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Module metadata (name, log path).
    #[serde(default)]
    pub meta: Option<ModuleMeta>,

    /// One entry per exchange account.
    pub accounts: Vec<AccountConfig>,

    /// Reconciliation history sink.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Module metadata block.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
    /// Write the rolling log file as JSON lines.
    #[serde(default)]
    pub json_logs: bool,
}

/// Where reconciliation records are appended.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// JSON-lines file; records stay in memory when unset.
    pub reconcile_history_path: Option<String>,
}

/// A single exchange account and the ladders traded on it.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Human-readable account label used in logs.
    pub name: String,

    /// Exchange identifier: `"mexc"` or `"bitget"`.
    pub exchange: String,

    /// API key, secret, optional passphrase and testnet flag.
    #[serde(flatten)]
    pub credentials: Credentials,

    // -- Endpoint overrides --
    /// REST base URL override.
    pub rest_url: Option<String>,
    /// Public WebSocket URL override.
    pub ws_public_url: Option<String>,
    /// Private WebSocket URL override.
    pub ws_private_url: Option<String>,

    // -- Timing --
    /// Bounded timeout for every REST call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Upper bound for the contract-precision discovery at startup.
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,

    /// Fixed delay between WebSocket reconnect attempts.
    #[serde(default = "default_reconnect_backoff_secs")]
    pub reconnect_backoff_secs: u64,

    /// WebSocket heartbeat period.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// How long to wait for a login acknowledgement.
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,

    /// Period of the reconciliation loop.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,

    /// Orders younger than this are not reset when missing from the open-order list.
    #[serde(default = "default_missing_order_grace_secs")]
    pub missing_order_grace_secs: u64,

    // -- Orders --
    /// Prefix of every client order id this process generates.
    #[serde(default = "default_client_order_prefix")]
    pub client_order_prefix: String,

    /// Leverage sent with opening orders.
    #[serde(default = "default_leverage")]
    pub leverage: u32,

    /// Kline interval for the public market stream.
    #[serde(default)]
    pub kline_interval: KlineInterval,

    /// Ladders on this account.
    pub symbols: Vec<SymbolConfig>,
}

impl AccountConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn missing_order_grace(&self) -> Duration {
        Duration::from_secs(self.missing_order_grace_secs)
    }

    pub fn symbol_names(&self) -> Vec<String> {
        self.symbols.iter().map(|s| s.symbol.clone()).collect()
    }

    /// Fail fast on values that would make the adapter or ledger unusable.
    pub fn validate(&self) -> Result<(), GridError> {
        let ctx = |msg: String| GridError::Config(format!("account '{}': {msg}", self.name));

        if self.credentials.api_key.trim().is_empty() {
            return Err(ctx("api_key is empty".into()));
        }
        if self.credentials.secret_key.trim().is_empty() {
            return Err(ctx("secret_key is empty".into()));
        }
        if self.client_order_prefix.is_empty()
            || self.client_order_prefix.len() > 8
            || !self.client_order_prefix.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ctx(format!(
                "client_order_prefix '{}' must be 1-8 ASCII alphanumerics",
                self.client_order_prefix
            )));
        }
        if self.request_timeout_secs == 0 || self.heartbeat_interval_secs == 0 || self.reconcile_interval_secs == 0 {
            return Err(ctx("timeouts and intervals must be positive".into()));
        }
        for raw in [&self.rest_url, &self.ws_public_url, &self.ws_private_url].into_iter().flatten() {
            url::Url::parse(raw).map_err(|e| ctx(format!("invalid url '{raw}': {e}")))?;
        }
        if self.symbols.is_empty() {
            return Err(ctx("no symbols configured".into()));
        }
        for symbol in &self.symbols {
            symbol.validate().map_err(|e| ctx(e.to_string()))?;
        }
        Ok(())
    }
}

/// One ladder: a symbol plus its grid geometry.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolConfig {
    /// Canonical symbol (e.g. `"BTCUSDT"`).
    pub symbol: String,

    /// Distance between adjacent slots.
    pub price_interval: f64,

    /// Slots on each side of the anchor price.
    pub window_size: u32,

    /// Quantity of every slot order.
    pub order_quantity: f64,

    /// Ladder centre; the latest trade price is used when unset.
    #[serde(default)]
    pub anchor_price: Option<f64>,

    /// Place missing ladder orders after each reconciliation pass.
    #[serde(default)]
    pub auto_place: bool,

    /// Upper bound on orders placed per maintenance pass.
    #[serde(default = "default_max_orders_per_pass")]
    pub max_orders_per_pass: usize,
}

impl SymbolConfig {
    fn validate(&self) -> Result<(), GridError> {
        if self.symbol.trim().is_empty() {
            return Err(GridError::Config("empty symbol".into()));
        }
        if !(self.price_interval.is_finite() && self.price_interval > 0.0) {
            return Err(GridError::Config(format!("{}: price_interval must be positive", self.symbol)));
        }
        if self.window_size == 0 {
            return Err(GridError::Config(format!("{}: window_size must be positive", self.symbol)));
        }
        if !(self.order_quantity.is_finite() && self.order_quantity > 0.0) {
            return Err(GridError::Config(format!("{}: order_quantity must be positive", self.symbol)));
        }
        if let Some(anchor) = self.anchor_price {
            if !(anchor.is_finite() && anchor > 0.0) {
                return Err(GridError::Config(format!("{}: anchor_price must be positive", self.symbol)));
            }
        }
        Ok(())
    }
}

impl AppConfig {
    /// Returns the module name, defaulting to `"grid-sync"`.
    pub fn module_name(&self) -> String {
        self.meta.as_ref().and_then(|m| m.module_name.clone()).unwrap_or_else(|| "grid-sync".into())
    }

    /// Returns the log path.
    pub fn log_path(&self) -> Option<String> {
        self.meta.as_ref().and_then(|m| m.log_path.clone())
    }

    pub fn json_logs(&self) -> bool {
        self.meta.as_ref().is_some_and(|m| m.json_logs)
    }

    pub fn validate(&self) -> Result<(), GridError> {
        if self.accounts.is_empty() {
            return Err(GridError::Config("no accounts configured".into()));
        }
        for account in &self.accounts {
            account.validate()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Defaults (used by serde)
// ---------------------------------------------------------------------------

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_discovery_timeout_secs() -> u64 {
    5
}

fn default_reconnect_backoff_secs() -> u64 {
    5
}

fn default_heartbeat_interval_secs() -> u64 {
    15
}

fn default_auth_timeout_secs() -> u64 {
    10
}

fn default_reconcile_interval_secs() -> u64 {
    60
}

fn default_missing_order_grace_secs() -> u64 {
    10
}

fn default_client_order_prefix() -> String {
    "grid".into()
}

fn default_leverage() -> u32 {
    10
}

fn default_max_orders_per_pass() -> usize {
    4
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    Ok(config)
}
