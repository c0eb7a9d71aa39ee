use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{MS_15M, MS_1D, MS_1H};
use crate::error::{Error, Result};

/// Candle timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tf {
    /// 15-minute candles
    #[serde(rename = "15m")]
    M15,
    /// 1-hour candles
    #[serde(rename = "1h")]
    H1,
    /// Daily candles
    #[serde(rename = "1d")]
    D1,
}

impl Tf {
    /// Canonical string stored in the warehouse `tf` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tf::M15 => "15m",
            Tf::H1 => "1h",
            Tf::D1 => "1d",
        }
    }

    /// Bar width in milliseconds.
    pub fn interval_ms(&self) -> i64 {
        match self {
            Tf::M15 => MS_15M,
            Tf::H1 => MS_1H,
            Tf::D1 => MS_1D,
        }
    }

    /// Interval value expected by the candle source API.
    pub fn source_interval(&self) -> &'static str {
        match self {
            Tf::M15 => "15m",
            Tf::H1 => "1H",
            Tf::D1 => "1D",
        }
    }

    /// Snap a timestamp down onto this timeframe's grid.
    pub fn align_ms(&self, ts_ms: i64) -> i64 {
        ts_ms - ts_ms.rem_euclid(self.interval_ms())
    }

    pub fn is_aligned(&self, ts_ms: i64) -> bool {
        ts_ms.rem_euclid(self.interval_ms()) == 0
    }

    pub fn parse(s: &str) -> Result<Tf> {
        match s.trim().to_lowercase().as_str() {
            "15m" => Ok(Tf::M15),
            "1h" => Ok(Tf::H1),
            "1d" => Ok(Tf::D1),
            other => Err(Error::Validation(format!("Unsupported tf: {}", other))),
        }
    }

    /// Parse a comma-separated tf list ("1d,1h,15m"), deduplicated in input
    /// order.
    pub fn parse_list(s: &str) -> Result<Vec<Tf>> {
        let mut out = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let tf = Tf::parse(part)?;
            if !out.contains(&tf) {
                out.push(tf);
            }
        }
        if out.is_empty() {
            return Err(Error::Validation(format!("No timeframes in: {}", s)));
        }
        Ok(out)
    }

    pub fn all() -> [Tf; 3] {
        [Tf::M15, Tf::H1, Tf::D1]
    }
}

impl fmt::Display for Tf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips() {
        for tf in Tf::all() {
            assert_eq!(Tf::parse(tf.as_str()).unwrap(), tf);
        }
        assert!(Tf::parse("5m").is_err());
    }

    #[test]
    fn parse_list_dedupes() {
        let tfs = Tf::parse_list("1d, 1h,1d,15m").unwrap();
        assert_eq!(tfs, vec![Tf::D1, Tf::H1, Tf::M15]);
        assert!(Tf::parse_list(" , ").is_err());
    }

    #[test]
    fn align_snaps_to_grid() {
        // 2023-11-14T22:13:20Z
        let ts = 1_700_000_000_000_i64;
        assert_eq!(Tf::D1.align_ms(ts) % Tf::D1.interval_ms(), 0);
        assert!(Tf::D1.align_ms(ts) <= ts);
        assert!(ts - Tf::D1.align_ms(ts) < Tf::D1.interval_ms());
        assert!(Tf::M15.is_aligned(Tf::M15.align_ms(ts)));
        assert!(!Tf::H1.is_aligned(ts + 1));
    }
}
