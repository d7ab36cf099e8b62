//! Price source gateway with ordered fallback.
//!
//! A preferred source (remembered on the alert or call that asked for the
//! price) is tried first. After that the fixed order of
//! [`PriceSource::FALLBACK_ORDER`] is walked, skipping the preferred one.

use crate::client::PriceClient;
use crate::error::{FeedError, FeedResult};
use crate::rest::{BitgetRestFetcher, BybitRestFetcher};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use pricewatch_core::{Exchange, PriceInfo, PriceQuote, PriceSource, PRICE_INFO_WINDOWS};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Uniform current/historical price access over all registered exchanges.
#[derive(Clone, Default)]
pub struct PriceGateway {
    clients: HashMap<Exchange, Arc<dyn PriceClient>>,
}

impl PriceGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway backed by the live Bitget and Bybit REST APIs.
    pub fn with_defaults(timeout: Duration) -> FeedResult<Self> {
        let mut gateway = Self::new();
        gateway.register_client(Arc::new(BitgetRestFetcher::new(timeout)?));
        gateway.register_client(Arc::new(BybitRestFetcher::new(timeout)?));
        Ok(gateway)
    }

    /// Register a client for its exchange, replacing any previous one.
    pub fn register_client(&mut self, client: Arc<dyn PriceClient>) {
        self.clients.insert(client.exchange(), client);
    }

    /// Sources in the order they are tried.
    pub fn sources_for(preferred: Option<PriceSource>) -> Vec<PriceSource> {
        let mut order = Vec::with_capacity(PriceSource::FALLBACK_ORDER.len() + 1);
        if let Some(source) = preferred {
            order.push(source);
        }
        for source in PriceSource::FALLBACK_ORDER {
            if Some(source) != preferred {
                order.push(source);
            }
        }
        order
    }

    /// Current price from the first source that answers.
    pub async fn current_price(
        &self,
        symbol: &str,
        preferred: Option<PriceSource>,
    ) -> FeedResult<PriceQuote> {
        let mut last = None;
        for source in Self::sources_for(preferred) {
            let Some(client) = self.clients.get(&source.exchange) else {
                last = Some(FeedError::NoClient(source.exchange));
                continue;
            };
            match client.current_price(symbol, source.market).await {
                Ok(price) => {
                    debug!(symbol = symbol, source = %source, price = price, "Got current price");
                    return Ok(PriceQuote::new(price, source));
                }
                Err(e) => {
                    debug!(symbol = symbol, source = %source, error = %e, "Current price failed, trying next source");
                    last = Some(e);
                }
            }
        }
        Err(Self::exhausted(symbol, last))
    }

    /// Price at `at` from the first source with candle data in the window.
    pub async fn historical_price(
        &self,
        symbol: &str,
        at: DateTime<Utc>,
        preferred: Option<PriceSource>,
    ) -> FeedResult<f64> {
        let mut last = None;
        for source in Self::sources_for(preferred) {
            let Some(client) = self.clients.get(&source.exchange) else {
                last = Some(FeedError::NoClient(source.exchange));
                continue;
            };
            match client.historical_price(symbol, source.market, at).await {
                Ok(price) => return Ok(price),
                Err(e) => {
                    debug!(symbol = symbol, source = %source, error = %e, "Historical price failed, trying next source");
                    last = Some(e);
                }
            }
        }
        Err(Self::exhausted(symbol, last))
    }

    /// Current quote plus changes over 15m, 1h, 4h and 24h.
    ///
    /// Historical lookups start at the source that produced the quote and
    /// run concurrently. A failed lookup leaves its change empty.
    pub async fn price_info(
        &self,
        symbol: &str,
        preferred: Option<PriceSource>,
    ) -> FeedResult<PriceInfo> {
        let quote = self.current_price(symbol, preferred).await?;
        let now = Utc::now();

        let lookups = PRICE_INFO_WINDOWS.iter().map(|(_, minutes)| {
            let at = now - ChronoDuration::minutes(*minutes);
            async move { self.historical_price(symbol, at, Some(quote.source)).await.ok() }
        });
        let past: Vec<Option<f64>> = join_all(lookups).await;

        Ok(PriceInfo::from_history(
            quote,
            [past[0], past[1], past[2], past[3]],
        ))
    }

    fn exhausted(symbol: &str, last: Option<FeedError>) -> FeedError {
        FeedError::AllSourcesFailed {
            symbol: symbol.to_string(),
            last: Box::new(last.unwrap_or(FeedError::NoData {
                symbol: symbol.to_string(),
                origin: PriceSource::FALLBACK_ORDER[0],
            })),
        }
    }
}
