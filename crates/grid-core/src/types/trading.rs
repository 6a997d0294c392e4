//! Trading-related data structures: credentials, orders, positions, accounts.
//!
//! Everything here is a value: adapters build these from REST/WS payloads and
//! newer snapshots supersede older ones instead of mutating them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::enums::{OrderStatus, Side};

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// API credentials for one exchange account.
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    /// API key sent in request headers / login frames.
    pub api_key: String,
    /// HMAC secret.
    pub secret_key: String,
    /// Passphrase (Bitget).
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Route requests to the venue's demo environment.
    #[serde(default)]
    pub testnet: bool,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), secret_key: secret_key.into(), passphrase: None, testnet: false }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.api_key.chars().take(4).collect();
        f.debug_struct("Credentials")
            .field("api_key", &format_args!("{prefix}***"))
            .field("secret_key", &"***")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .field("testnet", &self.testnet)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Order request (engine → adapter)
// ---------------------------------------------------------------------------

/// A limit order the engine wants placed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Canonical symbol (e.g. `"BTCUSDT"`).
    pub symbol: String,
    pub side: Side,
    /// Limit price.
    pub price: f64,
    /// Order quantity.
    pub quantity: f64,
    /// Caller-assigned id used to correlate stream events with the slot.
    pub client_order_id: String,
    /// Close an existing long instead of opening a new position.
    pub reduce_only: bool,
}

// ---------------------------------------------------------------------------
// Canonical order
// ---------------------------------------------------------------------------

/// An order snapshot normalized from a REST response or stream push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalOrder {
    /// Exchange-assigned order ID.
    pub order_id: String,
    /// Client-assigned order ID (empty when the venue did not echo one).
    pub client_order_id: String,
    /// Canonical symbol.
    pub symbol: String,
    pub side: Side,
    /// Limit price.
    pub price: f64,
    /// Requested quantity.
    pub quantity: f64,
    /// Cumulative executed quantity.
    pub filled_quantity: f64,
    pub status: OrderStatus,
    pub reduce_only: bool,
    /// Exchange timestamp of this snapshot (ms since epoch).
    pub update_time: u64,
}

impl CanonicalOrder {
    pub fn remaining(&self) -> f64 {
        (self.quantity - self.filled_quantity).max(0.0)
    }
}

// ---------------------------------------------------------------------------
// Position / account
// ---------------------------------------------------------------------------

/// A position snapshot from the exchange.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CanonicalPosition {
    /// Canonical symbol.
    pub symbol: String,
    /// Net position size (positive = long, negative = short).
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: f64,
}

/// Balance snapshot in the quote asset.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CanonicalAccount {
    pub total_wallet_balance: f64,
    pub total_margin_balance: f64,
    pub available_balance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_redacts_secrets() {
        let creds = Credentials::new("mx0vglAbCdEf", "super-secret").with_passphrase("pass");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("mx0v***"));
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("pass\""));
    }

    #[test]
    fn remaining_never_negative() {
        let order = CanonicalOrder {
            order_id: "1".into(),
            client_order_id: "grid-1".into(),
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            price: 50_000.0,
            quantity: 1.0,
            filled_quantity: 1.2,
            status: OrderStatus::Filled,
            reduce_only: false,
            update_time: 0,
        };
        assert_eq!(order.remaining(), 0.0);
    }
}
