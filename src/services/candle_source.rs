//! OHLCV fetch from the candle provider's chart endpoint.
//!
//! The provider speaks a columnar format: POST with
//! `{timeFrame, symbols, to, countBack}`, response `[{o,h,l,c,v,t}]` where
//! `t` holds unix seconds as ints or strings.

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::models::{Candle, Tf};
use crate::services::source_client::{CallOptions, SourceClient};

pub const DEFAULT_BASE_URL: &str = "https://trading.vietcap.com.vn/api/";

#[derive(Debug, Clone)]
pub struct CandleSource {
    client: SourceClient,
    base_url: String,
    source_tag: String,
}

impl CandleSource {
    pub fn new(client: SourceClient, base_url: Option<String>, source_tag: &str) -> Self {
        let mut base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { client, base_url, source_tag: source_tag.to_string() }
    }

    /// Fetch up to `count_back` bars ending at `to_ts_ms`, returned ascending
    /// and filtered to `>= from_ts_ms`. NaN-ish rows (missing o/h/l/c) are
    /// dropped; timestamps are aligned onto the tf grid.
    pub async fn fetch_window(
        &self,
        ticker: &str,
        tf: Tf,
        from_ts_ms: i64,
        to_ts_ms: i64,
        count_back: u32,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}chart/OHLCChart/gap-chart", self.base_url);
        let payload = json!({
            "timeFrame": tf.source_interval(),
            "symbols": [ticker],
            "to": to_ts_ms / 1000,
            "countBack": count_back,
        });

        let resp = self
            .client
            .post_json(&url, &payload, &CallOptions::default())
            .await?;

        let body = resp
            .json
            .ok_or_else(|| Error::Parse(format!("Non-JSON chart response: {}", crate::utils::truncate_chars(&resp.text, 200))))?;

        parse_columnar(&body, ticker, tf, from_ts_ms, to_ts_ms, &self.source_tag)
    }
}

/// Decode `[{o,h,l,c,v,t}]` into candles. Pure so it stays testable without
/// a network.
pub fn parse_columnar(
    body: &Value,
    ticker: &str,
    tf: Tf,
    from_ts_ms: i64,
    to_ts_ms: i64,
    source_tag: &str,
) -> Result<Vec<Candle>> {
    let arr = body
        .as_array()
        .ok_or_else(|| Error::Parse("Chart response is not an array".to_string()))?;
    let Some(item) = arr.first() else {
        return Ok(Vec::new());
    };

    let col = |key: &str| -> Result<&Vec<Value>> {
        item.get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Parse(format!("Chart response missing column: {}", key)))
    };

    let (opens, highs, lows, closes, volumes, times) =
        (col("o")?, col("h")?, col("l")?, col("c")?, col("v")?, col("t")?);

    let n = times.len();
    if [opens.len(), highs.len(), lows.len(), closes.len(), volumes.len()]
        .iter()
        .any(|&len| len != n)
    {
        return Err(Error::Parse("Chart response has ragged columns".to_string()));
    }

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let ts_sec = match &times[i] {
            Value::String(s) => s
                .parse::<i64>()
                .map_err(|_| Error::Parse(format!("Bad timestamp string: {}", s)))?,
            Value::Number(num) => num
                .as_i64()
                .ok_or_else(|| Error::Parse(format!("Bad timestamp number: {}", num)))?,
            other => return Err(Error::Parse(format!("Bad timestamp value: {}", other))),
        };
        let ts_ms = tf.align_ms(ts_sec * 1000);
        if ts_ms < from_ts_ms || ts_ms > to_ts_ms {
            continue;
        }

        let (Some(o), Some(h), Some(l), Some(c)) = (
            opens[i].as_f64(),
            highs[i].as_f64(),
            lows[i].as_f64(),
            closes[i].as_f64(),
        ) else {
            continue;
        };

        let candle = Candle {
            ticker: ticker.to_string(),
            tf,
            ts: ts_ms,
            o,
            h,
            l,
            c,
            v: volumes[i].as_f64(),
            source: Some(source_tag.to_string()),
        };
        // Bars violating l <= min(o,c) <= max(o,c) <= h never enter the
        // warehouse.
        if candle.is_coherent() {
            out.push(candle);
        }
    }

    out.sort_by_key(|c| c.ts);
    out.dedup_by_key(|c| c.ts);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_columnar_response() {
        let day = Tf::D1.interval_ms() / 1000;
        let t0 = 1_700_006_400_i64; // not grid-aligned at the ms level
        let body = json!([{
            "o": [1.0, 2.0, null],
            "h": [1.5, 2.5, 3.5],
            "l": [0.5, 1.5, 2.5],
            "c": [1.2, 2.2, 3.2],
            "v": [100, 200, 300],
            "t": [t0.to_string(), t0 + day, t0 + 2 * day],
        }]);

        let rows = parse_columnar(&body, "FPT", Tf::D1, 0, i64::MAX, "vci").unwrap();
        // third row dropped (null open)
        assert_eq!(rows.len(), 2);
        assert!(rows[0].ts < rows[1].ts);
        assert!(Tf::D1.is_aligned(rows[0].ts));
        assert_eq!(rows[0].source.as_deref(), Some("vci"));
        assert_eq!(rows[1].o, 2.0);
    }

    #[test]
    fn window_filter_applies() {
        let day = Tf::D1.interval_ms();
        let t0_ms = Tf::D1.align_ms(1_700_000_000_000);
        let body = json!([{
            "o": [1.0, 2.0, 3.0],
            "h": [1.0, 2.0, 3.0],
            "l": [1.0, 2.0, 3.0],
            "c": [1.0, 2.0, 3.0],
            "v": [1, 2, 3],
            "t": [t0_ms / 1000, (t0_ms + day) / 1000, (t0_ms + 2 * day) / 1000],
        }]);
        let rows =
            parse_columnar(&body, "FPT", Tf::D1, t0_ms + day, t0_ms + day, "vci").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ts, t0_ms + day);
    }

    #[test]
    fn incoherent_bars_are_dropped() {
        let t0 = Tf::D1.align_ms(1_700_000_000_000) / 1000;
        // high below the open
        let body = json!([{
            "o": [2.0], "h": [1.0], "l": [0.5], "c": [1.5], "v": [1], "t": [t0],
        }]);
        assert!(parse_columnar(&body, "FPT", Tf::D1, 0, i64::MAX, "vci").unwrap().is_empty());
    }

    #[test]
    fn empty_and_ragged_responses() {
        assert!(parse_columnar(&json!([]), "FPT", Tf::D1, 0, 1, "vci").unwrap().is_empty());
        let ragged = json!([{ "o": [1], "h": [], "l": [1], "c": [1], "v": [1], "t": [1] }]);
        assert!(parse_columnar(&ragged, "FPT", Tf::D1, 0, 1, "vci").is_err());
        assert!(parse_columnar(&json!({}), "FPT", Tf::D1, 0, 1, "vci").is_err());
    }
}
