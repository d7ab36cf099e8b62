//! Error types for price fetching.

use pricewatch_core::{Exchange, PriceSource};
use thiserror::Error;

/// Errors that can occur while fetching prices.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} from {origin}")]
    Status { origin: PriceSource, status: u16 },

    #[error("{origin} API error code={code} msg={message}")]
    Api {
        origin: PriceSource,
        code: String,
        message: String,
    },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Symbol {symbol} not found on {origin}")]
    SymbolNotFound { symbol: String, origin: PriceSource },

    #[error("No data for {symbol} on {origin}")]
    NoData { symbol: String, origin: PriceSource },

    #[error("No client registered for {0}")]
    NoClient(Exchange),

    #[error("Failed to get price for {symbol} from any source: {last}")]
    AllSourcesFailed { symbol: String, last: Box<FeedError> },
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::ParseError(err.to_string())
    }
}

impl FeedError {
    /// Returns true if this error is transient and likely to succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            FeedError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FeedError::Status { status, .. } => *status == 429 || *status >= 500,
            FeedError::AllSourcesFailed { last, .. } => last.is_transient(),
            _ => false,
        }
    }
}

pub type FeedResult<T> = Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pricewatch_core::MarketType;

    #[test]
    fn test_transient_classification() {
        let origin = PriceSource::new(Exchange::Bitget, MarketType::Spot);
        assert!(FeedError::Status { origin, status: 503 }.is_transient());
        assert!(FeedError::Status { origin, status: 429 }.is_transient());
        assert!(!FeedError::Status { origin, status: 404 }.is_transient());
        assert!(!FeedError::SymbolNotFound {
            symbol: "XUSDT".to_string(),
            origin
        }
        .is_transient());

        let wrapped = FeedError::AllSourcesFailed {
            symbol: "XUSDT".to_string(),
            last: Box::new(FeedError::Status { origin, status: 502 }),
        };
        assert!(wrapped.is_transient());
        assert!(wrapped.to_string().contains("any source"));
    }
}
