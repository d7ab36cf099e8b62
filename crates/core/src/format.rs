//! Ticker normalization and number formatting shared by commands and notifications.

/// Quote suffixes that mark a ticker as already complete.
const QUOTE_SUFFIXES: [&str; 6] = ["USDT", "USD", "BUSD", "DAI", "USDC", "UST"];

/// Upper-case a user ticker and append `USDT` unless it already carries a quote.
///
/// `btc` becomes `BTCUSDT`, `ethusdc` stays `ETHUSDC`.
pub fn normalize_symbol(ticker: &str) -> String {
    let upper = ticker.trim().trim_start_matches('$').to_ascii_uppercase();
    if upper.is_empty() || QUOTE_SUFFIXES.iter().any(|q| upper.ends_with(q)) {
        upper
    } else {
        format!("{upper}USDT")
    }
}

/// Shortest decimal that round-trips. Tiny values fall back to exponent form.
pub fn format_price(price: f64) -> String {
    if !price.is_finite() {
        return price.to_string();
    }
    if price.abs() > 1e-6 || price == 0.0 {
        format!("{price}")
    } else {
        format!("{price:e}")
    }
}

/// Signed percent with two decimals: `+1.23%`, `-0.50%`, `0.00%`.
pub fn format_change(change: f64) -> String {
    let rounded = (change * 100.0).round() / 100.0;
    if rounded > 0.0 {
        format!("+{rounded:.2}%")
    } else if rounded < 0.0 {
        format!("{rounded:.2}%")
    } else {
        "0.00%".to_string()
    }
}
