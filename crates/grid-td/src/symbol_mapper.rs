//! Bidirectional symbol mapping between canonical and venue formats.
//!
//! Internally every symbol is the concatenated form (`BTCUSDT`). MEXC futures
//! spell it `BTC_USDT`, Bitget uses the concatenated form as-is. The mapper
//! splits a canonical symbol at a known quote asset; symbols that do not end
//! in one fall back to the default quote asset with a warning instead of
//! failing.
//!
//! Explicit mappings (loaded from contract metadata) take precedence over the
//! suffix rule.

use std::collections::HashMap;

use tracing::warn;

/// Venue spelling of a trading pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolStyle {
    /// `BTCUSDT`
    Concatenated,
    /// `BTC_USDT`
    Underscore,
}

/// Quote assets recognized when splitting a canonical symbol, longest first.
const KNOWN_QUOTES: &[&str] = &["USDT", "USDC", "USD", "BTC", "ETH"];

/// Quote asset assumed for symbols with no recognizable suffix.
pub const DEFAULT_QUOTE: &str = "USDT";

/// Bidirectional symbol mapper for one venue.
#[derive(Debug, Clone)]
pub struct SymbolMapper {
    style: SymbolStyle,
    /// Canonical → venue overrides.
    canonical_to_venue: HashMap<String, String>,
    /// Venue → canonical overrides.
    venue_to_canonical: HashMap<String, String>,
}

impl SymbolMapper {
    pub fn new(style: SymbolStyle) -> Self {
        Self { style, canonical_to_venue: HashMap::new(), venue_to_canonical: HashMap::new() }
    }

    /// Split a canonical symbol into `(base, quote)`.
    ///
    /// Accepts `BTCUSDT`, `BTC_USDT`, `BTC/USDT` and `BTC-USDT`.
    pub fn split(&self, canonical: &str) -> (String, String) {
        let upper = canonical.trim().to_ascii_uppercase();
        if let Some((base, quote)) = upper.split_once(['_', '/', '-']) {
            if !base.is_empty() && !quote.is_empty() {
                return (base.to_string(), quote.to_string());
            }
        }
        for quote in KNOWN_QUOTES {
            if let Some(base) = upper.strip_suffix(quote) {
                if !base.is_empty() {
                    return (base.to_string(), (*quote).to_string());
                }
            }
        }
        warn!("[symbol] no known quote asset in '{canonical}', assuming {DEFAULT_QUOTE}");
        (upper, DEFAULT_QUOTE.to_string())
    }

    /// Convert a canonical symbol to the venue format.
    pub fn to_venue(&self, canonical: &str) -> String {
        if let Some(venue) = self.canonical_to_venue.get(canonical) {
            return venue.clone();
        }
        let (base, quote) = self.split(canonical);
        match self.style {
            SymbolStyle::Concatenated => format!("{base}{quote}"),
            SymbolStyle::Underscore => format!("{base}_{quote}"),
        }
    }

    /// Convert a venue symbol back to the canonical format.
    pub fn to_canonical(&self, venue: &str) -> String {
        if let Some(canonical) = self.venue_to_canonical.get(venue) {
            return canonical.clone();
        }
        let upper = venue.trim().to_ascii_uppercase();
        match self.style {
            SymbolStyle::Concatenated => upper,
            SymbolStyle::Underscore => upper.replace('_', ""),
        }
    }

    /// Add a single bidirectional mapping.
    pub fn add_mapping(&mut self, venue: &str, canonical: &str) {
        self.canonical_to_venue.insert(canonical.to_string(), venue.to_string());
        self.venue_to_canonical.insert(venue.to_string(), canonical.to_string());
    }

    /// Returns the number of explicit mappings.
    pub fn len(&self) -> usize {
        self.venue_to_canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.venue_to_canonical.is_empty()
    }
}
