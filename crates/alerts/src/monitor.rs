//! Periodic price polling.

use crate::config::MonitorConfig;
use crate::db::{Database, DbResult};
use crate::pipeline::PriceHandler;
use async_trait::async_trait;
use pricewatch_core::{percent_change, PriceSource};
use pricewatch_feeds::PriceGateway;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Source of the symbols to poll.
#[async_trait]
pub trait SymbolProvider: Send + Sync {
    /// Every symbol with an alert or an open call, sorted.
    async fn monitored_symbols(&self) -> DbResult<Vec<String>>;

    /// Source to ask first for a symbol, if one was recorded.
    async fn preferred_source(&self, symbol: &str) -> DbResult<Option<PriceSource>>;
}

#[async_trait]
impl SymbolProvider for Database {
    async fn monitored_symbols(&self) -> DbResult<Vec<String>> {
        self.all_monitored_symbols().await
    }

    async fn preferred_source(&self, symbol: &str) -> DbResult<Option<PriceSource>> {
        Database::preferred_source(self, symbol).await
    }
}

/// Outcome of one poll pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub symbols: usize,
    pub fetched: usize,
    pub failed: usize,
}

/// Polls the registry's symbols and hands each price to the handler.
///
/// The last-price cache belongs to this instance only.
pub struct PriceMonitor {
    symbols: Arc<dyn SymbolProvider>,
    gateway: PriceGateway,
    handler: Arc<dyn PriceHandler>,
    config: MonitorConfig,
    last_prices: HashMap<String, f64>,
}

impl PriceMonitor {
    pub fn new(
        symbols: Arc<dyn SymbolProvider>,
        gateway: PriceGateway,
        handler: Arc<dyn PriceHandler>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            symbols,
            gateway,
            handler,
            config,
            last_prices: HashMap::new(),
        }
    }

    /// Last price seen for a symbol.
    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.last_prices.get(symbol).copied()
    }

    /// Poll immediately, then every `poll_interval` until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(interval_secs = self.config.poll_interval.as_secs(), "Price monitor started");

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let summary = self.poll_once(&cancel).await;
                    debug!(
                        symbols = summary.symbols,
                        fetched = summary.fetched,
                        failed = summary.failed,
                        "Poll pass finished"
                    );
                }
            }
        }

        info!("Price monitor stopped");
    }

    /// One pass over the current symbol set.
    pub async fn poll_once(&mut self, cancel: &CancellationToken) -> PollSummary {
        let symbols = match self.symbols.monitored_symbols().await {
            Ok(symbols) => symbols,
            Err(e) => {
                warn!(error = %e, "Failed to load monitored symbols");
                return PollSummary::default();
            }
        };

        let mut summary = PollSummary {
            symbols: symbols.len(),
            ..Default::default()
        };
        if symbols.is_empty() {
            self.last_prices.clear();
            return summary;
        }

        for symbol in &symbols {
            if cancel.is_cancelled() {
                return summary;
            }

            let preferred = match self.symbols.preferred_source(symbol).await {
                Ok(preferred) => preferred,
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "No preferred source");
                    None
                }
            };
            let quote = match self.gateway.current_price(symbol, preferred).await {
                Ok(quote) => quote,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Failed to fetch price, skipping");
                    summary.failed += 1;
                    continue;
                }
            };
            // A result that lands after cancellation is dropped.
            if cancel.is_cancelled() {
                return summary;
            }
            summary.fetched += 1;

            if let Some(previous) = self.last_prices.insert(symbol.clone(), quote.price) {
                let delta = percent_change(previous, quote.price);
                let threshold = self.config.notable_move_percent;
                if threshold > 0.0 && delta.abs() >= threshold {
                    info!(
                        symbol = %symbol,
                        from = previous,
                        to = quote.price,
                        change = delta,
                        "Notable move"
                    );
                }
            }

            self.handler.on_price(symbol, quote.price).await;
        }

        let live: HashSet<&String> = symbols.iter().collect();
        self.last_prices.retain(|symbol, _| live.contains(symbol));
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbError;
    use pretty_assertions::assert_eq;
    use pricewatch_core::{Exchange, MarketType};
    use pricewatch_feeds::MockPriceClient;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct StaticSymbols {
        symbols: Mutex<Vec<String>>,
        fail: Mutex<bool>,
    }

    impl StaticSymbols {
        fn set(&self, symbols: &[&str]) {
            *self.symbols.lock().unwrap() = symbols.iter().map(|s| s.to_string()).collect();
        }
    }

    #[async_trait]
    impl SymbolProvider for StaticSymbols {
        async fn monitored_symbols(&self) -> DbResult<Vec<String>> {
            if *self.fail.lock().unwrap() {
                return Err(DbError::Sqlx(sqlx::Error::PoolClosed));
            }
            Ok(self.symbols.lock().unwrap().clone())
        }

        async fn preferred_source(&self, _symbol: &str) -> DbResult<Option<PriceSource>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<(String, f64)>>,
    }

    #[async_trait]
    impl PriceHandler for RecordingHandler {
        async fn on_price(&self, symbol: &str, price: f64) {
            self.seen.lock().unwrap().push((symbol.to_string(), price));
        }
    }

    struct Fixture {
        symbols: Arc<StaticSymbols>,
        client: Arc<MockPriceClient>,
        handler: Arc<RecordingHandler>,
        monitor: PriceMonitor,
    }

    fn fixture() -> Fixture {
        let symbols = Arc::new(StaticSymbols::default());
        let client = Arc::new(MockPriceClient::new(Exchange::Bitget));
        let handler = Arc::new(RecordingHandler::default());
        let mut gateway = PriceGateway::new();
        gateway.register_client(client.clone());
        let config = MonitorConfig {
            poll_interval: Duration::from_millis(20),
            notable_move_percent: 1.0,
            record_price_history: false,
        };
        let monitor = PriceMonitor::new(symbols.clone(), gateway, handler.clone(), config);
        Fixture {
            symbols,
            client,
            handler,
            monitor,
        }
    }

    #[tokio::test]
    async fn test_empty_registry_issues_no_requests() {
        let mut f = fixture();
        let summary = f.monitor.poll_once(&CancellationToken::new()).await;
        assert_eq!(summary, PollSummary::default());
        assert_eq!(f.client.request_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_symbol_is_skipped_alone() {
        let mut f = fixture();
        f.symbols.set(&["AUSDT", "BUSDT", "CUSDT"]);
        f.client.set_price("AUSDT", MarketType::Spot, 1.0);
        f.client.set_price("CUSDT", MarketType::Futures, 3.0);

        let summary = f.monitor.poll_once(&CancellationToken::new()).await;
        assert_eq!(
            summary,
            PollSummary {
                symbols: 3,
                fetched: 2,
                failed: 1
            }
        );
        assert_eq!(
            *f.handler.seen.lock().unwrap(),
            vec![("AUSDT".to_string(), 1.0), ("CUSDT".to_string(), 3.0)]
        );
    }

    #[tokio::test]
    async fn test_every_price_reaches_handler_and_cache_is_pruned() {
        let mut f = fixture();
        f.symbols.set(&["AUSDT", "BUSDT"]);
        f.client.set_price("AUSDT", MarketType::Spot, 1.0);
        f.client.set_price("BUSDT", MarketType::Spot, 2.0);
        let cancel = CancellationToken::new();

        f.monitor.poll_once(&cancel).await;
        // Unchanged prices are still evaluated.
        f.monitor.poll_once(&cancel).await;
        assert_eq!(f.handler.seen.lock().unwrap().len(), 4);
        assert_eq!(f.monitor.last_price("BUSDT"), Some(2.0));

        f.symbols.set(&["AUSDT"]);
        f.monitor.poll_once(&cancel).await;
        assert_eq!(f.monitor.last_price("BUSDT"), None);
        assert_eq!(f.monitor.last_price("AUSDT"), Some(1.0));

        f.symbols.set(&[]);
        f.monitor.poll_once(&cancel).await;
        assert_eq!(f.monitor.last_price("AUSDT"), None);
    }

    #[tokio::test]
    async fn test_registry_failure_skips_pass() {
        let mut f = fixture();
        f.symbols.set(&["AUSDT"]);
        *f.symbols.fail.lock().unwrap() = true;
        let summary = f.monitor.poll_once(&CancellationToken::new()).await;
        assert_eq!(summary.symbols, 0);
        assert_eq!(f.client.request_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_pass_handles_nothing() {
        let mut f = fixture();
        f.symbols.set(&["AUSDT"]);
        f.client.set_price("AUSDT", MarketType::Spot, 1.0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        f.monitor.poll_once(&cancel).await;
        assert!(f.handler.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_polls_immediately_until_cancelled() {
        let f = fixture();
        f.symbols.set(&["AUSDT"]);
        f.client.set_price("AUSDT", MarketType::Spot, 1.0);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(f.monitor.run(cancel.clone()));
        tokio::time::timeout(Duration::from_secs(1), async {
            while f.handler.seen.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
