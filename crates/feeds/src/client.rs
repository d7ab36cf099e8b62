//! Per-exchange price client abstraction.

use crate::{FeedError, FeedResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pricewatch_core::{Exchange, MarketType, PriceSource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Trait for exchange price APIs.
#[async_trait]
pub trait PriceClient: Send + Sync {
    /// Exchange served by this client.
    fn exchange(&self) -> Exchange;

    /// Latest price of `symbol` on `market`.
    async fn current_price(&self, symbol: &str, market: MarketType) -> FeedResult<f64>;

    /// Close of the latest 1-minute candle ending at `at`.
    async fn historical_price(
        &self,
        symbol: &str,
        market: MarketType,
        at: DateTime<Utc>,
    ) -> FeedResult<f64>;
}

type PriceKey = (String, MarketType);

/// Mock price client for testing.
pub struct MockPriceClient {
    exchange: Exchange,
    current: Mutex<HashMap<PriceKey, f64>>,
    historical: Mutex<HashMap<PriceKey, f64>>,
    requests: AtomicUsize,
}

impl MockPriceClient {
    pub fn new(exchange: Exchange) -> Self {
        Self {
            exchange,
            current: Mutex::new(HashMap::new()),
            historical: Mutex::new(HashMap::new()),
            requests: AtomicUsize::new(0),
        }
    }

    /// Set the current price returned for a symbol.
    pub fn set_price(&self, symbol: &str, market: MarketType, price: f64) {
        if let Ok(mut map) = self.current.lock() {
            map.insert((symbol.to_string(), market), price);
        }
    }

    /// Make a symbol unavailable on a market.
    pub fn remove_price(&self, symbol: &str, market: MarketType) {
        if let Ok(mut map) = self.current.lock() {
            map.remove(&(symbol.to_string(), market));
        }
    }

    /// Set the price returned for any historical lookup of a symbol.
    pub fn set_historical(&self, symbol: &str, market: MarketType, price: f64) {
        if let Ok(mut map) = self.historical.lock() {
            map.insert((symbol.to_string(), market), price);
        }
    }

    /// Number of requests served so far (current and historical).
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn lookup(
        &self,
        map: &Mutex<HashMap<PriceKey, f64>>,
        symbol: &str,
        market: MarketType,
    ) -> FeedResult<f64> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let origin = PriceSource::new(self.exchange, market);
        map.lock()
            .map_err(|e| FeedError::ParseError(e.to_string()))?
            .get(&(symbol.to_string(), market))
            .copied()
            .ok_or_else(|| FeedError::SymbolNotFound {
                symbol: symbol.to_string(),
                origin,
            })
    }
}

#[async_trait]
impl PriceClient for MockPriceClient {
    fn exchange(&self) -> Exchange {
        self.exchange
    }

    async fn current_price(&self, symbol: &str, market: MarketType) -> FeedResult<f64> {
        self.lookup(&self.current, symbol, market)
    }

    async fn historical_price(
        &self,
        symbol: &str,
        market: MarketType,
        _at: DateTime<Utc>,
    ) -> FeedResult<f64> {
        self.lookup(&self.historical, symbol, market)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_client_prices() {
        let client = MockPriceClient::new(Exchange::Bybit);
        client.set_price("BTCUSDT", MarketType::Spot, 50000.0);

        assert_eq!(
            client.current_price("BTCUSDT", MarketType::Spot).await.unwrap(),
            50000.0
        );
        assert!(matches!(
            client.current_price("BTCUSDT", MarketType::Futures).await,
            Err(FeedError::SymbolNotFound { .. })
        ));

        client.remove_price("BTCUSDT", MarketType::Spot);
        assert!(client.current_price("BTCUSDT", MarketType::Spot).await.is_err());
        assert_eq!(client.request_count(), 3);
    }
}
