//! Missing-bar detection and repair enqueueing.
//!
//! Daily bars are checked against the trading-day grid (weekdays minus the
//! static holiday table). Intraday grids depend on venue session times, so
//! 1h/15m use the consecutive-delta heuristic: a jump of more than twice the
//! bar width is a gap.

use chrono::{DateTime, Datelike, Utc, Weekday};
use serde::Serialize;
use tracing::info;

use crate::constants::{VN_EXTRA_HOLIDAYS, VN_FIXED_HOLIDAYS};
use crate::error::Result;
use crate::models::Tf;
use crate::services::warehouse::Warehouse;
use crate::utils::{ms_to_date, now_ms};

/// One contiguous missing window on the tf grid, inclusive bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapWindow {
    pub start_ts: i64,
    pub end_ts: i64,
    pub expected_bars: i32,
}

pub fn is_vn_trading_day(date: chrono::NaiveDate) -> bool {
    match date.weekday() {
        Weekday::Sat | Weekday::Sun => return false,
        _ => {}
    }
    if VN_FIXED_HOLIDAYS.contains(&(date.month(), date.day())) {
        return false;
    }
    !VN_EXTRA_HOLIDAYS.contains(&(date.year(), date.month(), date.day()))
}

/// Daily gaps: walk the trading-day grid between the oldest and newest
/// observed bars and collect contiguous missing runs.
pub fn find_daily_gaps(present_ts: &[i64]) -> Vec<GapWindow> {
    if present_ts.len() < 2 {
        return Vec::new();
    }
    let day = Tf::D1.interval_ms();
    let present: std::collections::HashSet<i64> =
        present_ts.iter().map(|&ts| Tf::D1.align_ms(ts)).collect();
    let first = Tf::D1.align_ms(*present_ts.first().unwrap());
    let last = Tf::D1.align_ms(*present_ts.last().unwrap());

    let mut gaps = Vec::new();
    let mut run: Option<(i64, i64, i32)> = None; // (start, last_missing, count)
    let mut ts = first;
    while ts <= last {
        let date = DateTime::<Utc>::from_timestamp_millis(ts)
            .map(|dt| dt.date_naive())
            .unwrap_or_default();
        let expected = is_vn_trading_day(date);
        if expected && !present.contains(&ts) {
            match &mut run {
                Some((_, end, count)) => {
                    *end = ts;
                    *count += 1;
                }
                None => run = Some((ts, ts, 1)),
            }
        } else if expected {
            if let Some((start, end, count)) = run.take() {
                gaps.push(GapWindow { start_ts: start, end_ts: end, expected_bars: count });
            }
        }
        ts += day;
    }
    if let Some((start, end, count)) = run {
        gaps.push(GapWindow { start_ts: start, end_ts: end, expected_bars: count });
    }
    gaps
}

/// Intraday gaps via the 2× delta heuristic over consecutive observed bars.
pub fn find_intraday_gaps(tf: Tf, present_ts: &[i64]) -> Vec<GapWindow> {
    let interval = tf.interval_ms();
    let mut gaps = Vec::new();
    for pair in present_ts.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a > 2 * interval {
            let start_ts = a + interval;
            let end_ts = b - interval;
            gaps.push(GapWindow {
                start_ts,
                end_ts,
                expected_bars: ((end_ts - start_ts) / interval + 1) as i32,
            });
        }
    }
    gaps
}

pub fn find_gaps(tf: Tf, present_ts: &[i64]) -> Vec<GapWindow> {
    match tf {
        Tf::D1 => find_daily_gaps(present_ts),
        Tf::H1 | Tf::M15 => find_intraday_gaps(tf, present_ts),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GapScanSummary {
    pub ok: bool,
    pub tf: String,
    pub tickers_scanned: usize,
    pub windows_enqueued: usize,
}

/// Scan recent candles per ticker and enqueue repair windows.
pub struct GapDetector {
    warehouse: Warehouse,
}

impl GapDetector {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    pub async fn scan(
        &self,
        tf: Tf,
        lookback_days: i64,
        limit_tickers: i64,
    ) -> Result<GapScanSummary> {
        let since = now_ms() - lookback_days * Tf::D1.interval_ms();
        let tickers = self.warehouse.candle_tickers(tf, limit_tickers).await?;

        let mut enqueued = 0usize;
        for ticker in &tickers {
            let present = self.warehouse.candle_timestamps(ticker, tf, since).await?;
            for gap in find_gaps(tf, &present) {
                let note = format!(
                    "gap {}..{} ({} bars)",
                    ms_to_date(gap.start_ts),
                    ms_to_date(gap.end_ts),
                    gap.expected_bars
                );
                let touched = self
                    .warehouse
                    .enqueue_repair(ticker, tf, gap.start_ts, gap.end_ts, gap.expected_bars, &note)
                    .await?;
                if touched {
                    enqueued += 1;
                }
            }
        }

        let summary = GapScanSummary {
            ok: true,
            tf: tf.as_str().to_string(),
            tickers_scanned: tickers.len(),
            windows_enqueued: enqueued,
        };
        info!(summary = %serde_json::to_string(&summary).unwrap_or_default(), "Gap scan done");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day_ts(date: &str) -> i64 {
        crate::utils::parse_timestamp(date).unwrap().timestamp_millis()
    }

    #[test]
    fn trading_day_filter() {
        // 2026-01-05 is a Monday
        assert!(is_vn_trading_day(chrono::NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()));
        // Saturday
        assert!(!is_vn_trading_day(chrono::NaiveDate::from_ymd_opt(2026, 1, 3).unwrap()));
        // fixed holiday: National Day
        assert!(!is_vn_trading_day(chrono::NaiveDate::from_ymd_opt(2026, 9, 2).unwrap()));
        // Tet 2026 closure
        assert!(!is_vn_trading_day(chrono::NaiveDate::from_ymd_opt(2026, 2, 17).unwrap()));
    }

    #[test]
    fn daily_gaps_skip_weekends() {
        // Mon 2026-01-05 .. Fri 2026-01-09, with Wed+Thu missing
        let present = vec![
            day_ts("2026-01-05"),
            day_ts("2026-01-06"),
            day_ts("2026-01-09"),
        ];
        let gaps = find_daily_gaps(&present);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].start_ts, day_ts("2026-01-07"));
        assert_eq!(gaps[0].end_ts, day_ts("2026-01-08"));
        assert_eq!(gaps[0].expected_bars, 2);

        // Fri -> Mon is not a gap
        let contiguous = vec![day_ts("2026-01-09"), day_ts("2026-01-12")];
        assert!(find_daily_gaps(&contiguous).is_empty());
    }

    #[test]
    fn intraday_gaps_use_delta_heuristic() {
        let h = Tf::H1.interval_ms();
        let t0 = 1_700_000_000_000_i64;
        // one bar missing between t0+h and t0+3h
        let present = vec![t0, t0 + h, t0 + 3 * h];
        let gaps = find_intraday_gaps(Tf::H1, &present);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].start_ts, t0 + 2 * h);
        assert_eq!(gaps[0].end_ts, t0 + 2 * h);
        assert_eq!(gaps[0].expected_bars, 1);

        // exactly 2x spacing is not a gap
        let tight = vec![t0, t0 + 2 * h];
        assert!(find_intraday_gaps(Tf::H1, &tight).is_empty());
    }
}
