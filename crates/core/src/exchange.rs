//! Exchange and market identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Exchange {
    Bitget = 1,
    Bybit = 2,
}

impl Exchange {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Exchange::Bitget),
            2 => Some(Exchange::Bybit),
            _ => None,
        }
    }

    #[inline]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Display name, also the value persisted in the store.
    pub fn name(self) -> &'static str {
        match self {
            Exchange::Bitget => "Bitget",
            Exchange::Bybit => "Bybit",
        }
    }

    /// Parse a persisted name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "bitget" => Some(Exchange::Bitget),
            "bybit" => Some(Exchange::Bybit),
            _ => None,
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Market type on an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Spot,
    /// USDT-margined perpetuals.
    Futures,
}

impl MarketType {
    pub fn as_str(self) -> &'static str {
        match self {
            MarketType::Spot => "spot",
            MarketType::Futures => "futures",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "spot" => Some(MarketType::Spot),
            "futures" => Some(MarketType::Futures),
            _ => None,
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A place a price can be read from: one market on one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceSource {
    pub exchange: Exchange,
    pub market: MarketType,
}

impl PriceSource {
    /// Priority order used when no preferred source answers.
    pub const FALLBACK_ORDER: [PriceSource; 4] = [
        PriceSource::new(Exchange::Bitget, MarketType::Spot),
        PriceSource::new(Exchange::Bitget, MarketType::Futures),
        PriceSource::new(Exchange::Bybit, MarketType::Spot),
        PriceSource::new(Exchange::Bybit, MarketType::Futures),
    ];

    pub const fn new(exchange: Exchange, market: MarketType) -> Self {
        Self { exchange, market }
    }

    /// Rebuild a source from the persisted exchange/market pair.
    /// Empty or unknown values yield `None`.
    pub fn from_names(exchange: &str, market: &str) -> Option<Self> {
        Some(Self::new(
            Exchange::from_name(exchange)?,
            MarketType::from_name(market)?,
        ))
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.exchange, self.market)
    }
}
