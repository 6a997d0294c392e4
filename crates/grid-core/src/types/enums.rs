//! Enumerations used throughout the grid slot sync system.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GridError;

// ---------------------------------------------------------------------------
// Order side / status (exchange facing)
// ---------------------------------------------------------------------------

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order status, unified across all exchanges.
///
/// `Rejected` and `Expired` are terminal like `Canceled`; the ledger treats
/// all three as "the order is gone without a full fill".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// `true` once the exchange will never change this order again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected | Self::Expired)
    }
}

// ---------------------------------------------------------------------------
// Slot sub-states
// ---------------------------------------------------------------------------

/// Whether a slot currently holds a position increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    #[default]
    Empty,
    Filled,
}

/// Order sub-state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotOrderStatus {
    #[default]
    NotPlaced,
    Placed,
    Confirmed,
    PartiallyFilled,
    Filled,
    Canceled,
}

impl SlotOrderStatus {
    /// `true` while an order may still change on the exchange.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Placed | Self::Confirmed | Self::PartiallyFilled)
    }
}

/// Placement guard of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    #[default]
    Free,
    Pending,
    Locked,
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => f.write_str("FREE"),
            Self::Pending => f.write_str("PENDING"),
            Self::Locked => f.write_str("LOCKED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Kline intervals
// ---------------------------------------------------------------------------

/// Canonical kline interval. Each adapter maps it through its own token table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum KlineInterval {
    #[default]
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl KlineInterval {
    pub const ALL: [KlineInterval; 7] = [Self::M1, Self::M5, Self::M15, Self::M30, Self::H1, Self::H4, Self::D1];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// Length of one candle in milliseconds.
    pub fn duration_ms(self) -> u64 {
        const MIN: u64 = 60_000;
        match self {
            Self::M1 => MIN,
            Self::M5 => 5 * MIN,
            Self::M15 => 15 * MIN,
            Self::M30 => 30 * MIN,
            Self::H1 => 60 * MIN,
            Self::H4 => 240 * MIN,
            Self::D1 => 1_440 * MIN,
        }
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KlineInterval {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|i| i.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| GridError::Config(format!("unknown kline interval: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
    }

    #[test]
    fn interval_parse_and_serde_agree() {
        for interval in KlineInterval::ALL {
            let parsed: KlineInterval = interval.as_str().parse().unwrap();
            assert_eq!(parsed, interval);
            let json = serde_json::to_string(&interval).unwrap();
            assert_eq!(json, format!("\"{}\"", interval.as_str()));
        }
        assert!("2m".parse::<KlineInterval>().is_err());
    }

    #[test]
    fn slot_statuses_serialize_screaming() {
        assert_eq!(serde_json::to_string(&SlotOrderStatus::NotPlaced).unwrap(), "\"NOT_PLACED\"");
        assert_eq!(serde_json::to_string(&SlotStatus::Locked).unwrap(), "\"LOCKED\"");
    }
}
