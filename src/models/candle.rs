use serde::{Deserialize, Serialize};

use super::Tf;

/// One OHLCV bar keyed by (ticker, tf, ts_ms). `ts` is unix milliseconds,
/// aligned to the tf grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub ticker: String,
    pub tf: Tf,
    pub ts: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: Option<f64>,
    pub source: Option<String>,
}

impl Candle {
    /// OHLC ordering sanity: l <= min(o,c) <= max(o,c) <= h.
    pub fn is_coherent(&self) -> bool {
        let lo = self.o.min(self.c);
        let hi = self.o.max(self.c);
        self.l <= lo && hi <= self.h
    }
}

/// Row of the `candles_latest` snapshot, served as-is by `/latest`.
#[derive(Debug, Clone, Serialize)]
pub struct LatestCandle {
    pub ticker: String,
    pub tf: String,
    pub ts: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: Option<f64>,
    pub source: Option<String>,
    pub ingested_at: Option<String>,
}

/// `/top-movers` row: latest close joined against the previous bar.
#[derive(Debug, Clone, Serialize)]
pub struct TopMover {
    pub ticker: String,
    pub tf: String,
    pub ts_latest: i64,
    pub close_latest: f64,
    pub close_prev: Option<f64>,
    pub pct_change: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle {
            ticker: "FPT".to_string(),
            tf: Tf::D1,
            ts: 1_700_000_000_000,
            o,
            h,
            l,
            c,
            v: None,
            source: None,
        }
    }

    #[test]
    fn coherence_check() {
        assert!(bar(1.0, 2.0, 0.5, 1.5).is_coherent());
        assert!(bar(1.0, 1.0, 1.0, 1.0).is_coherent());
        assert!(!bar(1.0, 0.9, 0.5, 1.5).is_coherent());
        assert!(!bar(0.4, 2.0, 0.5, 1.5).is_coherent());
    }
}
