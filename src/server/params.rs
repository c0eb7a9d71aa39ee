//! Query-parameter validation shared by the handlers. Kept pure so the
//! boundary rules are unit-testable without a server.

use std::sync::LazyLock;

use regex::Regex;

use crate::constants::{API_TICKER_RE, DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT};
use crate::models::Tf;
use crate::server::response::{ApiCode, ApiError};

static RE_TICKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(API_TICKER_RE).unwrap());

pub fn parse_ticker(raw: Option<&str>) -> Result<String, ApiError> {
    let raw = raw.ok_or_else(|| ApiError::with_message(ApiCode::MissingParam, "ticker"))?;
    let ticker = raw.trim().to_uppercase();
    if !RE_TICKER.is_match(&ticker) {
        return Err(ApiError::new(ApiCode::InvalidTicker));
    }
    Ok(ticker)
}

pub fn parse_tf(raw: Option<&str>) -> Result<Tf, ApiError> {
    let raw = raw.ok_or_else(|| ApiError::with_message(ApiCode::MissingParam, "tf"))?;
    Tf::parse(raw).map_err(|_| ApiError::with_message(ApiCode::MissingParam, "tf"))
}

/// limit ∈ [1, 2000], default 500. A present-but-bad value is invalid_limit.
pub fn parse_limit(raw: Option<&str>) -> Result<i64, ApiError> {
    match raw {
        None => Ok(DEFAULT_QUERY_LIMIT),
        Some(s) => {
            let n: i64 = s
                .trim()
                .parse()
                .map_err(|_| ApiError::new(ApiCode::InvalidLimit))?;
            if !(1..=MAX_QUERY_LIMIT).contains(&n) {
                return Err(ApiError::new(ApiCode::InvalidLimit));
            }
            Ok(n)
        }
    }
}

pub fn parse_before_ts(raw: Option<&str>) -> Result<Option<i64>, ApiError> {
    match raw {
        None => Ok(None),
        Some(s) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ApiError::with_message(ApiCode::MissingParam, "beforeTs")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_rules() {
        assert_eq!(parse_ticker(Some(" fpt ")).unwrap(), "FPT");
        assert_eq!(parse_ticker(Some("VN30F1M")).unwrap(), "VN30F1M");
        assert!(parse_ticker(Some("WAYTOOLONGNAME")).is_err());
        assert!(parse_ticker(Some("bad ticker")).is_err());
        assert!(parse_ticker(Some("")).is_err());
        assert!(parse_ticker(None).is_err());
    }

    #[test]
    fn limit_bounds() {
        assert_eq!(parse_limit(None).unwrap(), DEFAULT_QUERY_LIMIT);
        assert_eq!(parse_limit(Some("1")).unwrap(), 1);
        assert_eq!(parse_limit(Some("2000")).unwrap(), 2000);
        assert!(parse_limit(Some("0")).is_err());
        assert!(parse_limit(Some("2001")).is_err());
        assert!(parse_limit(Some("abc")).is_err());
    }

    #[test]
    fn tf_and_before_ts() {
        assert_eq!(parse_tf(Some("1d")).unwrap(), Tf::D1);
        assert!(parse_tf(Some("5m")).is_err());
        assert!(parse_tf(None).is_err());
        assert_eq!(parse_before_ts(Some("1700000000000")).unwrap(), Some(1_700_000_000_000));
        assert_eq!(parse_before_ts(None).unwrap(), None);
        assert!(parse_before_ts(Some("nope")).is_err());
    }
}
