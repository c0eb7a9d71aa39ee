//! Fundamentals ingest: fan out the provider's statement endpoints per
//! (ticker, period), hash the composed block, and only normalize + persist
//! when the hash moved. Raw blocks land on disk (atomic writes) for audit
//! and for the publish aggregation; normalized points land in `fi_points`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::constants::FI_METRIC_RE;
use crate::error::{Error, Result};
use crate::models::{normalize_period_date, FiPoint, Period, Statement};
use crate::services::source_client::{CallOptions, SourceClient};
use crate::services::warehouse::Warehouse;
use crate::utils::{atomic_write, atomic_write_json, block_hash};

/// Endpoint fan-out per (ticker, period). Order is the block layout order.
const ENDPOINTS: &[&str] = &[
    "periodSelect",
    "structureOverview",
    "aggCompareOverview",
    "is",
    "bs",
    "cf",
    "ratio",
];

static RE_METRIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(FI_METRIC_RE).unwrap());

#[derive(Debug, Clone)]
pub struct FundamentalsConfig {
    pub base_url: String,
    pub bearer_token: Option<String>,
    pub out_dir: PathBuf,
    pub fallback_to_q: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FundamentalsSummary {
    pub ok: bool,
    pub tickers: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub points_upserted: usize,
    pub fallback_applied: bool,
}

/// `state.json`: block hash per "TICKER:PERIOD".
#[derive(Debug, Default, serde::Deserialize, Serialize)]
struct SyncState {
    #[serde(default)]
    hashes: BTreeMap<String, String>,
}

pub struct FundamentalsSync {
    warehouse: Warehouse,
    client: SourceClient,
    config: FundamentalsConfig,
}

impl FundamentalsSync {
    pub fn new(warehouse: Warehouse, client: SourceClient, config: FundamentalsConfig) -> Self {
        Self { warehouse, client, config }
    }

    pub async fn run(&self, tickers: &[String], period: Period) -> Result<FundamentalsSummary> {
        // Yearly statements need the authenticated tier; degrade to Q.
        let (period, fallback_applied) =
            if period == Period::Y && self.config.bearer_token.is_none() {
                if !self.config.fallback_to_q {
                    return Err(Error::Config(
                        "Yearly fundamentals need a bearer token (fallback disabled)".to_string(),
                    ));
                }
                warn!("No bearer token for yearly fundamentals, falling back to quarterly");
                (Period::Q, true)
            } else {
                (period, false)
            };

        let mut state = self.load_state().await?;
        let mut summary = FundamentalsSummary {
            ok: true,
            tickers: tickers.len(),
            changed: 0,
            unchanged: 0,
            failed: 0,
            points_upserted: 0,
            fallback_applied,
        };

        for ticker in tickers {
            match self.sync_ticker(ticker, period, &mut state).await {
                Ok(Some(points)) => {
                    summary.changed += 1;
                    summary.points_upserted += points;
                }
                Ok(None) => summary.unchanged += 1,
                Err(e) => {
                    warn!(ticker = %ticker, error = %e, "Fundamentals sync failed, continuing");
                    summary.failed += 1;
                }
            }
        }

        self.save_state(&state).await?;
        self.warehouse.sync_fi_latest_from_points(period).await?;
        self.publish().await?;

        info!(summary = %serde_json::to_string(&summary).unwrap_or_default(), "Fundamentals run done");
        Ok(summary)
    }

    /// Returns Some(points_written) when the block hash moved, None when the
    /// provider payload is byte-for-byte (canonically) unchanged.
    async fn sync_ticker(
        &self,
        ticker: &str,
        period: Period,
        state: &mut SyncState,
    ) -> Result<Option<usize>> {
        let fetched_at = Utc::now().to_rfc3339();
        // All statement endpoints in flight at once; one failure fails the
        // ticker (a partial block would hash as a phantom change).
        let (period_select, structure, agg_compare, is, bs, cf, ratio) = tokio::join!(
            self.fetch_endpoint(ticker, period, ENDPOINTS[0]),
            self.fetch_endpoint(ticker, period, ENDPOINTS[1]),
            self.fetch_endpoint(ticker, period, ENDPOINTS[2]),
            self.fetch_endpoint(ticker, period, ENDPOINTS[3]),
            self.fetch_endpoint(ticker, period, ENDPOINTS[4]),
            self.fetch_endpoint(ticker, period, ENDPOINTS[5]),
            self.fetch_endpoint(ticker, period, ENDPOINTS[6]),
        );
        let mut endpoints = Map::new();
        for (name, payload) in ENDPOINTS.iter().zip([
            period_select?,
            structure?,
            agg_compare?,
            is?,
            bs?,
            cf?,
            ratio?,
        ]) {
            endpoints.insert(name.to_string(), payload);
        }
        let endpoints = Value::Object(endpoints);
        let hash = block_hash(&endpoints);

        let block = json!({
            "ticker": ticker,
            "period": period.as_str(),
            "fetchedAt": fetched_at,
            "blockHash": hash,
            "endpoints": endpoints,
        });

        // Latest raw block is rewritten every run; it's the publish input.
        let latest_path = self
            .config
            .out_dir
            .join("raw")
            .join(format!("{}_{}_latest.json", ticker, period.as_str()));
        atomic_write_json(&latest_path, &block).await?;

        let key = format!("{}:{}", ticker, period.as_str());
        if state.hashes.get(&key) == Some(&hash) {
            debug!(ticker, period = period.as_str(), "Block unchanged");
            return Ok(None);
        }

        // Changed: timestamped snapshot, NDJSON append, warehouse upsert.
        let day_dir = self
            .config
            .out_dir
            .join("raw")
            .join(Utc::now().format("%Y-%m-%d").to_string());
        atomic_write_json(
            &day_dir.join(format!("{}_{}.json", ticker, period.as_str())),
            &block,
        )
        .await?;

        let points = normalize_block(&block, ticker, period, &fetched_at);
        self.append_ndjson(ticker, period, &points).await?;
        let written = self.warehouse.upsert_fi_points(&points).await?;

        state.hashes.insert(key, hash);
        Ok(Some(written))
    }

    async fn fetch_endpoint(&self, ticker: &str, period: Period, name: &str) -> Result<Value> {
        let url = format!(
            "{}/{}?ticker={}&period={}",
            self.config.base_url.trim_end_matches('/'),
            name,
            ticker,
            period.as_str()
        );
        let mut opts = CallOptions::default();
        if let Some(token) = &self.config.bearer_token {
            opts = opts.bearer(token);
        }
        let resp = self.client.get(&url, &opts).await?;
        Ok(resp.json.unwrap_or(Value::Null))
    }

    async fn append_ndjson(&self, ticker: &str, period: Period, points: &[FiPoint]) -> Result<()> {
        let path = self
            .config
            .out_dir
            .join("normalized")
            .join(format!("{}_{}.ndjson", ticker, period.as_str()));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut body = String::new();
        for p in points {
            body.push_str(&serde_json::to_string(p)?);
            body.push('\n');
        }
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(body.as_bytes()).await?;
        Ok(())
    }

    /// Aggregate every raw latest block into publish/latest.json keyed by
    /// "TICKER:PERIOD" for the read API.
    pub async fn publish(&self) -> Result<()> {
        let raw_dir = self.config.out_dir.join("raw");
        let mut out = Map::new();
        let mut entries = match tokio::fs::read_dir(&raw_dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = name.strip_suffix("_latest.json") else { continue };
            let Some((ticker, period)) = stem.rsplit_once('_') else { continue };
            let body = tokio::fs::read_to_string(entry.path()).await?;
            if let Ok(block) = serde_json::from_str::<Value>(&body) {
                out.insert(format!("{}:{}", ticker, period), block);
            }
        }
        let publish_path = self.config.out_dir.join("publish").join("latest.json");
        atomic_write(&publish_path, serde_json::to_vec_pretty(&Value::Object(out))?.as_slice())
            .await
    }

    async fn load_state(&self) -> Result<SyncState> {
        let path = self.state_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => Ok(serde_json::from_str(&body).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SyncState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_state(&self, state: &SyncState) -> Result<()> {
        atomic_write_json(&self.state_path(), state).await
    }

    fn state_path(&self) -> PathBuf {
        self.config.out_dir.join("state.json")
    }
}

/// Flatten a block into fi_points rows: for each statement endpoint, each
/// item contributes its numeric metrics matching the metric shape; all other
/// keys pass through untouched in the raw block but never become rows.
pub fn normalize_block(
    block: &Value,
    ticker: &str,
    period: Period,
    fetched_at: &str,
) -> Vec<FiPoint> {
    let mut out = Vec::new();
    for (name, statement) in [
        ("is", Statement::Is),
        ("bs", Statement::Bs),
        ("cf", Statement::Cf),
        ("ratio", Statement::Ratio),
    ] {
        let items = block
            .pointer(&format!("/endpoints/{}/items", name))
            .and_then(Value::as_array);
        let Some(items) = items else { continue };

        for item in items {
            let Some(obj) = item.as_object() else { continue };
            let period_date = obj
                .get("periodDate")
                .and_then(Value::as_str)
                .and_then(normalize_period_date);
            let period_date_name = obj
                .get("periodDateName")
                .and_then(Value::as_str)
                .map(str::to_string);

            for (key, value) in obj {
                if !RE_METRIC.is_match(key) {
                    continue;
                }
                let Some(num) = value.as_f64() else { continue };
                out.push(FiPoint {
                    ticker: ticker.to_string(),
                    period,
                    statement,
                    period_date,
                    period_date_name: period_date_name.clone(),
                    metric: key.clone(),
                    value: Some(num),
                    fetched_at: fetched_at.to_string(),
                });
            }
        }
    }
    out.sort_by(|a, b| {
        (a.statement.as_str(), &a.metric, a.period_date)
            .cmp(&(b.statement.as_str(), &b.metric, b.period_date))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_keeps_numeric_statement_metrics_only() {
        let block = json!({
            "ticker": "FPT",
            "period": "Q",
            "endpoints": {
                "is": { "items": [
                    { "periodDate": "2025-12", "periodDateName": "Q4/2025",
                      "is1": 10, "is2": 20, "foo": "bar", "is3": "not a number" }
                ]},
                "ratio": { "items": [
                    { "periodDate": "2025-12", "r5": 1.5 }
                ]},
                "periodSelect": { "items": [ { "is9": 99 } ] }
            }
        });
        let points = normalize_block(&block, "FPT", Period::Q, "2026-01-01T00:00:00Z");
        assert_eq!(points.len(), 3);

        let is_points: Vec<_> = points.iter().filter(|p| p.statement == Statement::Is).collect();
        assert_eq!(is_points.len(), 2);
        assert_eq!(is_points[0].metric, "is1");
        assert_eq!(is_points[0].value, Some(10.0));
        assert_eq!(is_points[0].period_date, chrono::NaiveDate::from_ymd_opt(2025, 12, 1));
        assert_eq!(is_points[0].period_date_name.as_deref(), Some("Q4/2025"));
        assert_eq!(is_points[1].metric, "is2");
        assert_eq!(is_points[1].value, Some(20.0));

        let ratio: Vec<_> = points.iter().filter(|p| p.statement == Statement::Ratio).collect();
        assert_eq!(ratio.len(), 1);
        assert_eq!(ratio[0].metric, "r5");
        assert!(points.iter().all(|p| p.metric != "foo" && p.metric != "is9"));
    }

    #[test]
    fn metric_regex_shape() {
        for ok in ["is1", "bs12", "cf3", "r44", "ratio7"] {
            assert!(RE_METRIC.is_match(ok), "{}", ok);
        }
        for bad in ["is", "foo1", "kpi2", "is1x", "IS1"] {
            assert!(!RE_METRIC.is_match(bad), "{}", bad);
        }
    }
}
