//! Price observations.

use crate::{percent_change, PriceSource};
use serde::{Deserialize, Serialize};

/// A current price together with the source that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    pub source: PriceSource,
}

impl PriceQuote {
    pub fn new(price: f64, source: PriceSource) -> Self {
        Self { price, source }
    }
}

/// Lookback points reported by [`PriceInfo`], in minutes.
pub const PRICE_INFO_WINDOWS: [(&str, i64); 4] =
    [("15m", 15), ("1h", 60), ("4h", 240), ("24h", 1440)];

/// Current quote plus percent changes against earlier points in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceInfo {
    pub quote: PriceQuote,
    pub change_15m: Option<f64>,
    pub change_1h: Option<f64>,
    pub change_4h: Option<f64>,
    pub change_24h: Option<f64>,
}

impl PriceInfo {
    /// Build from the quote and the historical prices, ordered as
    /// [`PRICE_INFO_WINDOWS`]. A missing or non-positive past price leaves
    /// that change empty.
    pub fn from_history(quote: PriceQuote, past: [Option<f64>; 4]) -> Self {
        let change = |p: Option<f64>| {
            p.filter(|v| *v > 0.0)
                .map(|v| percent_change(v, quote.price))
        };
        Self {
            quote,
            change_15m: change(past[0]),
            change_1h: change(past[1]),
            change_4h: change(past[2]),
            change_24h: change(past[3]),
        }
    }

    /// Changes paired with their window labels.
    pub fn changes(&self) -> [(&'static str, Option<f64>); 4] {
        [
            (PRICE_INFO_WINDOWS[0].0, self.change_15m),
            (PRICE_INFO_WINDOWS[1].0, self.change_1h),
            (PRICE_INFO_WINDOWS[2].0, self.change_4h),
            (PRICE_INFO_WINDOWS[3].0, self.change_24h),
        ]
    }
}
