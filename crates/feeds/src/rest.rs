//! REST price fetchers for Bitget and Bybit.
//!
//! Current prices come from the ticker endpoints: the single-symbol query is
//! tried first, then the full ticker list of the market. Historical prices use
//! 1-minute candles in the two minutes ending at the requested time.

use crate::client::PriceClient;
use crate::error::{FeedError, FeedResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use pricewatch_core::{Exchange, MarketType, PriceSource};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Width of the candle window ending at the requested timestamp.
const CANDLE_WINDOW_MINUTES: i64 = 2;
const CANDLE_LIMIT: &str = "5";

/// GET a JSON document, mapping non-2xx statuses to `FeedError::Status`.
async fn get_json(
    http: &reqwest::Client,
    origin: PriceSource,
    url: &str,
    query: &[(&str, String)],
) -> FeedResult<Value> {
    debug!(url = url, source = %origin, "price request");

    let response = http.get(url).query(query).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FeedError::Status {
            origin,
            status: status.as_u16(),
        });
    }
    Ok(response.json::<Value>().await?)
}

fn parse_price(raw: &str) -> FeedResult<f64> {
    let price = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| FeedError::ParseError(format!("invalid price '{}'", raw)))?;
    if !price.is_finite() || price <= 0.0 {
        return Err(FeedError::ParseError(format!("non-positive price '{}'", raw)));
    }
    Ok(price)
}

/// Pick the ticker matching `symbol` and read its price. Futures prefer a
/// non-zero mark price.
fn price_from_tickers(
    tickers: &[Value],
    symbol: &str,
    origin: PriceSource,
    last_field: &str,
) -> FeedResult<f64> {
    if tickers.is_empty() {
        return Err(FeedError::NoData {
            symbol: symbol.to_string(),
            origin,
        });
    }

    let ticker = tickers
        .iter()
        .find(|t| {
            t["symbol"]
                .as_str()
                .is_some_and(|s| s.eq_ignore_ascii_case(symbol))
        })
        .ok_or_else(|| FeedError::SymbolNotFound {
            symbol: symbol.to_string(),
            origin,
        })?;

    let mark = ticker["markPrice"]
        .as_str()
        .filter(|m| !m.is_empty() && *m != "0");
    let raw = match (origin.market, mark) {
        (MarketType::Futures, Some(mark)) => mark,
        _ => ticker[last_field]
            .as_str()
            .ok_or_else(|| FeedError::ParseError(format!("missing {}", last_field)))?,
    };
    parse_price(raw)
}

/// Close price (index 4) of the newest candle row.
///
/// Bitget lists candles oldest first and Bybit newest first, so rows are
/// ranked by their start time (index 0).
fn close_from_candles(rows: &[Value], symbol: &str, origin: PriceSource) -> FeedResult<f64> {
    if rows.is_empty() {
        return Err(FeedError::NoData {
            symbol: symbol.to_string(),
            origin,
        });
    }

    let mut newest: Option<(i64, &str)> = None;
    for row in rows {
        let (start, close) = row
            .as_array()
            .filter(|row| row.len() >= 5)
            .and_then(|row| {
                let start = row[0].as_str()?.parse::<i64>().ok()?;
                Some((start, row[4].as_str()?))
            })
            .ok_or_else(|| FeedError::ParseError("invalid candle format".to_string()))?;
        if newest.map_or(true, |(best, _)| start > best) {
            newest = Some((start, close));
        }
    }

    match newest {
        Some((_, close)) => parse_price(close),
        None => Err(FeedError::NoData {
            symbol: symbol.to_string(),
            origin,
        }),
    }
}

fn candle_window(at: DateTime<Utc>) -> (String, String) {
    let start = at - ChronoDuration::minutes(CANDLE_WINDOW_MINUTES);
    (
        start.timestamp_millis().to_string(),
        at.timestamp_millis().to_string(),
    )
}

/// Parse a Bitget v2 ticker response.
pub fn parse_bitget_ticker(json: &Value, symbol: &str, market: MarketType) -> FeedResult<f64> {
    let origin = PriceSource::new(Exchange::Bitget, market);
    check_bitget_code(json, origin)?;
    let tickers = json["data"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    price_from_tickers(tickers, symbol, origin, "lastPr")
}

/// Parse a Bitget v2 candle response.
pub fn parse_bitget_candles(json: &Value, symbol: &str, market: MarketType) -> FeedResult<f64> {
    let origin = PriceSource::new(Exchange::Bitget, market);
    check_bitget_code(json, origin)?;
    let rows = json["data"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    close_from_candles(rows, symbol, origin)
}

fn check_bitget_code(json: &Value, origin: PriceSource) -> FeedResult<()> {
    let code = json["code"].as_str().unwrap_or_default();
    if code != "00000" {
        return Err(FeedError::Api {
            origin,
            code: code.to_string(),
            message: json["msg"].as_str().unwrap_or_default().to_string(),
        });
    }
    Ok(())
}

/// Parse a Bybit v5 ticker response.
pub fn parse_bybit_ticker(json: &Value, symbol: &str, market: MarketType) -> FeedResult<f64> {
    let origin = PriceSource::new(Exchange::Bybit, market);
    check_bybit_code(json, origin)?;
    let tickers = json["result"]["list"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    price_from_tickers(tickers, symbol, origin, "lastPrice")
}

/// Parse a Bybit v5 kline response.
pub fn parse_bybit_candles(json: &Value, symbol: &str, market: MarketType) -> FeedResult<f64> {
    let origin = PriceSource::new(Exchange::Bybit, market);
    check_bybit_code(json, origin)?;
    let rows = json["result"]["list"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    close_from_candles(rows, symbol, origin)
}

fn check_bybit_code(json: &Value, origin: PriceSource) -> FeedResult<()> {
    let code = json["retCode"].as_i64().unwrap_or(-1);
    if code != 0 {
        return Err(FeedError::Api {
            origin,
            code: code.to_string(),
            message: json["retMsg"].as_str().unwrap_or_default().to_string(),
        });
    }
    Ok(())
}

fn build_http(timeout: Duration) -> FeedResult<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Bitget REST price fetcher.
pub struct BitgetRestFetcher {
    http: reqwest::Client,
}

impl BitgetRestFetcher {
    const BASE_URL: &'static str = "https://api.bitget.com";
    const PRODUCT_TYPE: &'static str = "USDT-FUTURES";

    pub fn new(timeout: Duration) -> FeedResult<Self> {
        Ok(Self {
            http: build_http(timeout)?,
        })
    }

    async fn fetch_ticker(
        &self,
        path: &str,
        query: &[(&str, String)],
        symbol: &str,
        market: MarketType,
    ) -> FeedResult<f64> {
        let origin = PriceSource::new(Exchange::Bitget, market);
        let url = format!("{}{}", Self::BASE_URL, path);
        let json = get_json(&self.http, origin, &url, query).await?;
        parse_bitget_ticker(&json, symbol, market)
    }
}

#[async_trait]
impl PriceClient for BitgetRestFetcher {
    fn exchange(&self) -> Exchange {
        Exchange::Bitget
    }

    async fn current_price(&self, symbol: &str, market: MarketType) -> FeedResult<f64> {
        let (single_path, all_path, query) = match market {
            MarketType::Spot => (
                "/api/v2/spot/market/tickers",
                "/api/v2/spot/market/tickers",
                Vec::new(),
            ),
            MarketType::Futures => (
                "/api/v2/mix/market/ticker",
                "/api/v2/mix/market/tickers",
                vec![("productType", Self::PRODUCT_TYPE.to_string())],
            ),
        };

        let mut single_query = query.clone();
        single_query.push(("symbol", symbol.to_string()));
        match self
            .fetch_ticker(single_path, &single_query, symbol, market)
            .await
        {
            Ok(price) => Ok(price),
            Err(e) => {
                debug!(symbol = symbol, market = %market, error = %e, "Bitget: single ticker failed, trying full list");
                self.fetch_ticker(all_path, &query, symbol, market).await
            }
        }
    }

    async fn historical_price(
        &self,
        symbol: &str,
        market: MarketType,
        at: DateTime<Utc>,
    ) -> FeedResult<f64> {
        let origin = PriceSource::new(Exchange::Bitget, market);
        let (start, end) = candle_window(at);
        let mut query = vec![
            ("symbol", symbol.to_string()),
            ("startTime", start),
            ("endTime", end),
            ("limit", CANDLE_LIMIT.to_string()),
        ];
        let path = match market {
            MarketType::Spot => {
                query.push(("granularity", "1min".to_string()));
                "/api/v2/spot/market/candles"
            }
            MarketType::Futures => {
                query.push(("granularity", "1m".to_string()));
                query.push(("productType", Self::PRODUCT_TYPE.to_string()));
                "/api/v2/mix/market/candles"
            }
        };

        let url = format!("{}{}", Self::BASE_URL, path);
        let json = get_json(&self.http, origin, &url, &query).await?;
        parse_bitget_candles(&json, symbol, market)
    }
}

/// Bybit REST price fetcher.
pub struct BybitRestFetcher {
    http: reqwest::Client,
}

impl BybitRestFetcher {
    const BASE_URL: &'static str = "https://api.bybit.com";

    pub fn new(timeout: Duration) -> FeedResult<Self> {
        Ok(Self {
            http: build_http(timeout)?,
        })
    }

    fn category(market: MarketType) -> &'static str {
        match market {
            MarketType::Spot => "spot",
            MarketType::Futures => "linear",
        }
    }

    async fn fetch_tickers(
        &self,
        query: &[(&str, String)],
        symbol: &str,
        market: MarketType,
    ) -> FeedResult<f64> {
        let origin = PriceSource::new(Exchange::Bybit, market);
        let url = format!("{}/v5/market/tickers", Self::BASE_URL);
        let json = get_json(&self.http, origin, &url, query).await?;
        parse_bybit_ticker(&json, symbol, market)
    }
}

#[async_trait]
impl PriceClient for BybitRestFetcher {
    fn exchange(&self) -> Exchange {
        Exchange::Bybit
    }

    async fn current_price(&self, symbol: &str, market: MarketType) -> FeedResult<f64> {
        let category = ("category", Self::category(market).to_string());
        let single = [category.clone(), ("symbol", symbol.to_string())];
        match self.fetch_tickers(&single, symbol, market).await {
            Ok(price) => Ok(price),
            Err(e) => {
                debug!(symbol = symbol, market = %market, error = %e, "Bybit: single ticker failed, trying full list");
                self.fetch_tickers(&[category], symbol, market).await
            }
        }
    }

    async fn historical_price(
        &self,
        symbol: &str,
        market: MarketType,
        at: DateTime<Utc>,
    ) -> FeedResult<f64> {
        let origin = PriceSource::new(Exchange::Bybit, market);
        let (start, end) = candle_window(at);
        let query = [
            ("category", Self::category(market).to_string()),
            ("symbol", symbol.to_string()),
            ("interval", "1".to_string()),
            ("start", start),
            ("end", end),
            ("limit", CANDLE_LIMIT.to_string()),
        ];
        let url = format!("{}/v5/market/kline", Self::BASE_URL);
        let json = get_json(&self.http, origin, &url, &query).await?;
        parse_bybit_candles(&json, symbol, market)
    }
}
