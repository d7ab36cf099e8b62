//! Argument parsing for chat commands.
//!
//! Parsers take the text after the command name and never touch the store
//! or the network, so every usage rule is checked here.

use crate::db::DEFAULT_HISTORY_LIMIT;
use crate::reminder::parse_duration;
use chrono::Duration;
use pricewatch_core::{normalize_symbol, Direction};
use thiserror::Error;

pub const ADD_USAGE: &str = "Usage: /add TICKER [price|pct] VALUE\n\
     Example: /add BTC 65000\n\
     Example: /add ETH pct -5";
pub const OPEN_CALL_USAGE: &str = "Usage: /ocall TICKER [long|short] [deposit%] [sl PRICE]\n\
     Example: /ocall BTC long 40 sl 25000";
pub const CLOSE_CALL_USAGE: &str = "Usage: /ccall ID [size]\n\
     Example: /ccall 1a2b3c4d 50";
pub const STOP_LOSS_USAGE: &str = "Usage: /sl ID [price]\n\
     Without a price the stop-loss moves to the entry price, 0 removes it";
pub const DEL_USAGE: &str = "Usage: /del ID";
pub const PRICE_USAGE: &str = "Usage: /p TICKER";
pub const REMIND_USAGE: &str = "Usage: /remind TICKER 5m|2h|3d [text]";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArgError {
    #[error("{0}")]
    Usage(&'static str),
    #[error("Invalid number: {0}")]
    InvalidNumber(String),
    #[error("Alert type must be 'price' or 'pct'")]
    InvalidAlertType,
    #[error("Target price must be positive")]
    NonPositivePrice,
    #[error("Percent target must not be zero")]
    ZeroPercent,
    #[error("Stop-loss must be a number >= 0")]
    InvalidStopLoss,
    #[error("Size must be a number above 0")]
    InvalidSize,
    #[error("Invalid duration {0:?}, use e.g. 10m, 2h or 3d")]
    InvalidDuration(String),
}

/// Requested alert target before the base price is known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertTarget {
    Price(f64),
    Percent(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddArgs {
    pub symbol: String,
    pub target: AlertTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenCallArgs {
    pub symbol: String,
    pub direction: Direction,
    pub deposit_percent: f64,
    pub stop_loss: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseCallArgs {
    pub id: String,
    /// `None` closes whatever is left.
    pub size: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopLossArgs {
    pub id: String,
    /// `None` moves the stop to the entry price.
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemindArgs {
    pub symbol: String,
    pub after: Duration,
    pub text: String,
}

fn number(token: &str) -> Result<f64, ArgError> {
    token
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ArgError::InvalidNumber(token.to_string()))
}

/// `/add TICKER [price|pct] VALUE`; the type defaults to price.
pub fn parse_add(args: &str) -> Result<AddArgs, ArgError> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let (ticker, kind, value) = match parts.as_slice() {
        [ticker, value] => (*ticker, "price", *value),
        [ticker, kind, value] => (*ticker, *kind, *value),
        _ => return Err(ArgError::Usage(ADD_USAGE)),
    };

    let value = number(value)?;
    let target = match kind.to_ascii_lowercase().as_str() {
        "price" if value > 0.0 => AlertTarget::Price(value),
        "price" => return Err(ArgError::NonPositivePrice),
        "pct" if value != 0.0 => AlertTarget::Percent(value),
        "pct" => return Err(ArgError::ZeroPercent),
        _ => return Err(ArgError::InvalidAlertType),
    };

    Ok(AddArgs {
        symbol: normalize_symbol(ticker),
        target,
    })
}

/// `/ocall TICKER [long|short] [deposit%] [sl PRICE]`.
///
/// Direction defaults to long, deposit percent and stop-loss to 0.
pub fn parse_open_call(args: &str) -> Result<OpenCallArgs, ArgError> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let Some((ticker, mut rest)) = parts.split_first() else {
        return Err(ArgError::Usage(OPEN_CALL_USAGE));
    };

    let mut direction = Direction::Long;
    if let Some(d) = rest.first().and_then(|t| Direction::from_name(t)) {
        direction = d;
        rest = &rest[1..];
    }

    let mut deposit_percent = 0.0;
    if let Some(pct) = rest
        .first()
        .and_then(|t| t.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
    {
        deposit_percent = pct;
        rest = &rest[1..];
    }

    let mut stop_loss = 0.0;
    match rest {
        [] => {}
        [sl, price] if sl.eq_ignore_ascii_case("sl") => {
            stop_loss = price
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .ok_or(ArgError::InvalidStopLoss)?;
        }
        [sl] if sl.eq_ignore_ascii_case("sl") => return Err(ArgError::InvalidStopLoss),
        _ => return Err(ArgError::Usage(OPEN_CALL_USAGE)),
    }

    Ok(OpenCallArgs {
        symbol: normalize_symbol(ticker),
        direction,
        deposit_percent,
        stop_loss,
    })
}

/// `/ccall ID [size]`. The size is checked against the call later.
pub fn parse_close_call(args: &str) -> Result<CloseCallArgs, ArgError> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    match parts.as_slice() {
        [id] => Ok(CloseCallArgs {
            id: id.to_string(),
            size: None,
        }),
        [id, size] => {
            let size = size
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v > 0.0)
                .ok_or(ArgError::InvalidSize)?;
            Ok(CloseCallArgs {
                id: id.to_string(),
                size: Some(size),
            })
        }
        _ => Err(ArgError::Usage(CLOSE_CALL_USAGE)),
    }
}

/// `/sl ID [price]`.
pub fn parse_stop_loss(args: &str) -> Result<StopLossArgs, ArgError> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    match parts.as_slice() {
        [id] => Ok(StopLossArgs {
            id: id.to_string(),
            price: None,
        }),
        [id, price] => {
            let price = price
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .ok_or(ArgError::InvalidStopLoss)?;
            Ok(StopLossArgs {
                id: id.to_string(),
                price: Some(price),
            })
        }
        _ => Err(ArgError::Usage(STOP_LOSS_USAGE)),
    }
}

/// Single identifier argument, e.g. `/del ID`.
pub fn parse_id(args: &str, usage: &'static str) -> Result<String, ArgError> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    match parts.as_slice() {
        [id] => Ok(id.to_string()),
        _ => Err(ArgError::Usage(usage)),
    }
}

/// Single ticker argument, normalized.
pub fn parse_ticker(args: &str, usage: &'static str) -> Result<String, ArgError> {
    parse_id(args, usage).map(|t| normalize_symbol(&t))
}

/// `/history [N]`; anything unparsable gives the default.
pub fn parse_history_limit(args: &str) -> i64 {
    args.split_whitespace()
        .next()
        .and_then(|t| t.parse::<i64>().ok())
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
}

/// `/remind TICKER 5m|2h|3d [text]`.
pub fn parse_remind(args: &str) -> Result<RemindArgs, ArgError> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let [ticker, duration, text @ ..] = parts.as_slice() else {
        return Err(ArgError::Usage(REMIND_USAGE));
    };
    let after =
        parse_duration(duration).map_err(|_| ArgError::InvalidDuration(duration.to_string()))?;

    Ok(RemindArgs {
        symbol: normalize_symbol(ticker),
        after,
        text: text.join(" "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_add() {
        assert_eq!(
            parse_add("btc 65000").unwrap(),
            AddArgs {
                symbol: "BTCUSDT".to_string(),
                target: AlertTarget::Price(65000.0)
            }
        );
        assert_eq!(
            parse_add("ETHUSDT pct -5").unwrap().target,
            AlertTarget::Percent(-5.0)
        );
        assert_eq!(
            parse_add("sol PRICE 150.5").unwrap().target,
            AlertTarget::Price(150.5)
        );

        assert_eq!(parse_add(""), Err(ArgError::Usage(ADD_USAGE)));
        assert_eq!(parse_add("btc"), Err(ArgError::Usage(ADD_USAGE)));
        assert_eq!(parse_add("btc price 1 2"), Err(ArgError::Usage(ADD_USAGE)));
        assert_eq!(parse_add("btc vol 5"), Err(ArgError::InvalidAlertType));
        assert_eq!(parse_add("btc 0"), Err(ArgError::NonPositivePrice));
        assert_eq!(parse_add("btc pct 0"), Err(ArgError::ZeroPercent));
        assert_eq!(
            parse_add("btc abc"),
            Err(ArgError::InvalidNumber("abc".to_string()))
        );
        assert_eq!(
            parse_add("btc NaN"),
            Err(ArgError::InvalidNumber("NaN".to_string()))
        );
    }

    #[test]
    fn test_parse_open_call_defaults_and_options() {
        assert_eq!(
            parse_open_call("eth").unwrap(),
            OpenCallArgs {
                symbol: "ETHUSDT".to_string(),
                direction: Direction::Long,
                deposit_percent: 0.0,
                stop_loss: 0.0
            }
        );
        assert_eq!(
            parse_open_call("BTC long 40 sl 25000").unwrap(),
            OpenCallArgs {
                symbol: "BTCUSDT".to_string(),
                direction: Direction::Long,
                deposit_percent: 40.0,
                stop_loss: 25000.0
            }
        );

        let short = parse_open_call("btc Short sl 70000").unwrap();
        assert_eq!(short.direction, Direction::Short);
        assert_eq!(short.deposit_percent, 0.0);
        assert_eq!(short.stop_loss, 70000.0);

        assert_eq!(parse_open_call("btc 150").unwrap().deposit_percent, 150.0);
    }

    #[test]
    fn test_parse_open_call_rejects_bad_input() {
        assert_eq!(parse_open_call(""), Err(ArgError::Usage(OPEN_CALL_USAGE)));
        assert_eq!(parse_open_call("btc long 40 sl"), Err(ArgError::InvalidStopLoss));
        assert_eq!(parse_open_call("btc sl -1"), Err(ArgError::InvalidStopLoss));
        assert_eq!(
            parse_open_call("btc long 40 tp 1"),
            Err(ArgError::Usage(OPEN_CALL_USAGE))
        );
    }

    #[test]
    fn test_parse_close_and_stop_loss() {
        assert_eq!(
            parse_close_call("1a2b3c4d").unwrap(),
            CloseCallArgs {
                id: "1a2b3c4d".to_string(),
                size: None
            }
        );
        assert_eq!(parse_close_call("1a2b3c4d 40").unwrap().size, Some(40.0));
        assert_eq!(parse_close_call("1a2b3c4d 0"), Err(ArgError::InvalidSize));
        assert_eq!(parse_close_call(""), Err(ArgError::Usage(CLOSE_CALL_USAGE)));

        assert_eq!(parse_stop_loss("1a2b3c4d").unwrap().price, None);
        assert_eq!(parse_stop_loss("1a2b3c4d 0").unwrap().price, Some(0.0));
        assert_eq!(parse_stop_loss("1a2b3c4d -3"), Err(ArgError::InvalidStopLoss));
        assert_eq!(parse_stop_loss("a b c"), Err(ArgError::Usage(STOP_LOSS_USAGE)));
    }

    #[test]
    fn test_parse_single_arguments() {
        assert_eq!(parse_id(" 1a2b3c4d ", DEL_USAGE).unwrap(), "1a2b3c4d");
        assert_eq!(parse_id("", DEL_USAGE), Err(ArgError::Usage(DEL_USAGE)));
        assert_eq!(parse_ticker("pepe", PRICE_USAGE).unwrap(), "PEPEUSDT");
        assert_eq!(parse_ticker("a b", PRICE_USAGE), Err(ArgError::Usage(PRICE_USAGE)));

        assert_eq!(parse_history_limit(""), DEFAULT_HISTORY_LIMIT);
        assert_eq!(parse_history_limit("25"), 25);
        assert_eq!(parse_history_limit("lots"), DEFAULT_HISTORY_LIMIT);
    }

    #[test]
    fn test_parse_remind() {
        let args = parse_remind("btc 2h retest of the range").unwrap();
        assert_eq!(args.symbol, "BTCUSDT");
        assert_eq!(args.after, Duration::hours(2));
        assert_eq!(args.text, "retest of the range");

        assert_eq!(parse_remind("eth 10m").unwrap().text, "");
        assert_eq!(parse_remind("eth"), Err(ArgError::Usage(REMIND_USAGE)));
        assert_eq!(
            parse_remind("eth soon"),
            Err(ArgError::InvalidDuration("soon".to_string()))
        );
    }
}
