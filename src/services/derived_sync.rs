//! Rebuild of the derived/summary tables from raw ingest output. Every
//! statement is a full upsert over its source, so reruns converge to the
//! same state no matter what partial run preceded them.

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::services::warehouse::Warehouse;

/// fi_latest -> financials (straight copy with provenance).
const SQL_FINANCIALS: &str = r#"
INSERT INTO financials (ticker, period, statement, period_date, metric, value, source, updated_at)
SELECT ticker, period, statement, period_date, metric, value, 'fi_latest', now()
FROM fi_latest
ON CONFLICT (ticker, period, statement, metric) DO UPDATE SET
  period_date = EXCLUDED.period_date,
  value = EXCLUDED.value,
  source = EXCLUDED.source,
  updated_at = now()
"#;

/// financials -> fundamentals: newest period_date wins per (ticker, metric),
/// quarterly preferred over yearly on ties.
const SQL_FUNDAMENTALS: &str = r#"
WITH ranked AS (
  SELECT ticker, metric, value, period, period_date,
         row_number() OVER (
           PARTITION BY ticker, metric
           ORDER BY period_date DESC NULLS LAST,
                    CASE WHEN period='Q' THEN 1 WHEN period='Y' THEN 2 ELSE 3 END
         ) AS rn
  FROM financials
)
INSERT INTO fundamentals (ticker, metric, value, period, period_date, source, updated_at)
SELECT ticker, metric, value, period, period_date, 'financials', now()
FROM ranked WHERE rn = 1
ON CONFLICT (ticker, metric) DO UPDATE SET
  value = EXCLUDED.value,
  period = EXCLUDED.period,
  period_date = EXCLUDED.period_date,
  source = EXCLUDED.source,
  updated_at = now()
"#;

const SQL_TECHNICAL: &str = r#"
WITH base AS (
  SELECT ticker, tf, ts, c,
         row_number() OVER (PARTITION BY ticker, tf ORDER BY ts DESC) AS rn_desc,
         avg(c) OVER (PARTITION BY ticker, tf ORDER BY ts
                      ROWS BETWEEN 19 PRECEDING AND CURRENT ROW) AS sma20,
         avg(c) OVER (PARTITION BY ticker, tf ORDER BY ts
                      ROWS BETWEEN 49 PRECEDING AND CURRENT ROW) AS sma50
  FROM candles
  WHERE tf IN ('15m','1h','1d')
)
INSERT INTO technical_indicators (ticker, tf, asof_ts, close, sma20, sma50, ema20, updated_at)
SELECT ticker, tf, ts, c, sma20, sma50,
       (c * (2.0/21.0) + COALESCE(sma20, c) * (1 - 2.0/21.0)),
       now()
FROM base
WHERE rn_desc = 1
ON CONFLICT (ticker, tf) DO UPDATE SET
  asof_ts = EXCLUDED.asof_ts,
  close = EXCLUDED.close,
  sma20 = EXCLUDED.sma20,
  sma50 = EXCLUDED.sma50,
  ema20 = EXCLUDED.ema20,
  updated_at = now()
"#;

/// technical_indicators pivoted into long form.
const SQL_INDICATORS: &str = r#"
INSERT INTO indicators (ticker, tf, indicator, value, asof_ts, updated_at)
SELECT ticker, tf, v.indicator, v.value, asof_ts, now()
FROM technical_indicators
CROSS JOIN LATERAL (
  VALUES ('close', close), ('sma20', sma20), ('sma50', sma50), ('ema20', ema20)
) v(indicator, value)
ON CONFLICT (ticker, tf, indicator) DO UPDATE SET
  value = EXCLUDED.value,
  asof_ts = EXCLUDED.asof_ts,
  updated_at = now()
"#;

/// Coverage and frontier KPIs for the dashboard / health surfaces.
const SQL_MARKET_STATS: &str = r#"
WITH c AS (
  SELECT count(*)::float8 AS total_rows,
         count(distinct ticker)::float8 AS total_tickers,
         max(ts) AS max_ts,
         max(ingested_at) AS max_ingested_at
  FROM candles
), ca AS (
  SELECT count(*)::float8 AS ca_rows,
         count(*) FILTER (WHERE ex_date IS NOT NULL)::float8 AS ca_ex,
         count(*) FILTER (WHERE record_date IS NOT NULL)::float8 AS ca_record,
         count(*) FILTER (WHERE pay_date IS NOT NULL)::float8 AS ca_pay
  FROM corporate_actions
), eligible AS (
  SELECT ticker
  FROM symbols
  WHERE coalesce(active, true) = true
    AND ticker ~ '^[A-Z0-9]{3,4}$'
    AND ticker NOT IN ('VNINDEX','HNXINDEX','UPCOMINDEX')
), cov AS (
  SELECT
    (SELECT count(*)::float8 FROM eligible) AS eligible_total,
    (SELECT count(distinct c2.ticker)::float8
       FROM candles c2 JOIN eligible e ON e.ticker = c2.ticker) AS eligible_with_candles,
    (SELECT count(*)::float8
       FROM eligible e
       LEFT JOIN (SELECT distinct ticker FROM candles) c3 ON c3.ticker = e.ticker
      WHERE c3.ticker IS NULL) AS eligible_missing
), tf AS (
  SELECT
    count(distinct ticker) FILTER (WHERE tf='1d')::float8 AS tf_1d_tickers,
    count(distinct ticker) FILTER (WHERE tf='1h')::float8 AS tf_1h_tickers,
    count(distinct ticker) FILTER (WHERE tf='15m')::float8 AS tf_15m_tickers,
    count(*) FILTER (WHERE tf='1d')::float8 AS tf_1d_rows,
    count(*) FILTER (WHERE tf='1h')::float8 AS tf_1h_rows,
    count(*) FILTER (WHERE tf='15m')::float8 AS tf_15m_rows
  FROM candles
), diag AS (
  SELECT
    CASE
      WHEN c.max_ts IS NULL THEN 'unknown'
      WHEN (extract(epoch from now())*1000 - c.max_ts) <= 7200000 THEN 'fresh'
      WHEN c.max_ingested_at >= (now() - interval '30 minutes') THEN 'market_closed_or_source_limited'
      ELSE 'pipeline_stalled'
    END AS frontier_status,
    GREATEST(0, (extract(epoch from now())*1000 - c.max_ts))::float8 AS frontier_lag_ms
  FROM c
)
INSERT INTO market_stats (metric, value_numeric, value_text, asof_ts, updated_at)
SELECT * FROM (
  SELECT 'candles_total_rows', c.total_rows, NULL::text, c.max_ts, now() FROM c
  UNION ALL SELECT 'candles_total_tickers', c.total_tickers, NULL, c.max_ts, now() FROM c
  UNION ALL SELECT 'candles_max_ts', c.max_ts::float8, NULL, c.max_ts, now() FROM c
  UNION ALL SELECT 'candles_max_ingested_at', NULL, c.max_ingested_at::text, c.max_ts, now() FROM c
  UNION ALL SELECT 'candles_frontier_status', NULL, d.frontier_status, c.max_ts, now() FROM c, diag d
  UNION ALL SELECT 'candles_frontier_lag_ms', d.frontier_lag_ms, NULL, c.max_ts, now() FROM c, diag d

  UNION ALL SELECT 'candles_eligible_total', cov.eligible_total, NULL, c.max_ts, now() FROM cov, c
  UNION ALL SELECT 'candles_eligible_with_candles', cov.eligible_with_candles, NULL, c.max_ts, now() FROM cov, c
  UNION ALL SELECT 'candles_eligible_missing', cov.eligible_missing, NULL, c.max_ts, now() FROM cov, c
  UNION ALL SELECT 'candles_coverage_pct',
    CASE WHEN cov.eligible_total > 0
         THEN round((cov.eligible_with_candles/cov.eligible_total)*100.0) END,
    NULL, c.max_ts, now() FROM cov, c

  UNION ALL SELECT 'candles_1d_tickers', tf.tf_1d_tickers, NULL, c.max_ts, now() FROM tf, c
  UNION ALL SELECT 'candles_1h_tickers', tf.tf_1h_tickers, NULL, c.max_ts, now() FROM tf, c
  UNION ALL SELECT 'candles_15m_tickers', tf.tf_15m_tickers, NULL, c.max_ts, now() FROM tf, c
  UNION ALL SELECT 'candles_1d_rows', tf.tf_1d_rows, NULL, c.max_ts, now() FROM tf, c
  UNION ALL SELECT 'candles_1h_rows', tf.tf_1h_rows, NULL, c.max_ts, now() FROM tf, c
  UNION ALL SELECT 'candles_15m_rows', tf.tf_15m_rows, NULL, c.max_ts, now() FROM tf, c

  UNION ALL SELECT 'ca_total_rows', ca.ca_rows, NULL, (SELECT max_ts FROM c), now() FROM ca
  UNION ALL SELECT 'ca_ex_nonnull', ca.ca_ex, NULL, (SELECT max_ts FROM c), now() FROM ca
  UNION ALL SELECT 'ca_record_nonnull', ca.ca_record, NULL, (SELECT max_ts FROM c), now() FROM ca
  UNION ALL SELECT 'ca_pay_nonnull', ca.ca_pay, NULL, (SELECT max_ts FROM c), now() FROM ca
) s(metric, value_numeric, value_text, asof_ts, updated_at)
ON CONFLICT (metric) DO UPDATE SET
  value_numeric = EXCLUDED.value_numeric,
  value_text = EXCLUDED.value_text,
  asof_ts = EXCLUDED.asof_ts,
  updated_at = now()
"#;

/// Per-ticker context over a recent window: candle recency per tf, linked
/// article activity, fundamentals presence.
const SQL_CONTEXT_LATEST: &str = r#"
INSERT INTO symbol_context_latest
  (ticker, last_ts_1d, last_ts_1h, last_ts_15m, article_count_window,
   last_article_at, fi_metric_count, updated_at)
SELECT s.ticker,
       (SELECT ts FROM candles_latest cl WHERE cl.ticker = s.ticker AND cl.tf = '1d'),
       (SELECT ts FROM candles_latest cl WHERE cl.ticker = s.ticker AND cl.tf = '1h'),
       (SELECT ts FROM candles_latest cl WHERE cl.ticker = s.ticker AND cl.tf = '15m'),
       (SELECT count(*) FROM article_symbols asym
          JOIN articles a ON a.url = asym.article_url
         WHERE asym.ticker = s.ticker
           AND a.published_at >= now() - ($1 || ' days')::interval),
       (SELECT max(a.published_at) FROM article_symbols asym
          JOIN articles a ON a.url = asym.article_url
         WHERE asym.ticker = s.ticker),
       (SELECT count(*) FROM fi_latest f WHERE f.ticker = s.ticker),
       now()
FROM symbols s
ON CONFLICT (ticker) DO UPDATE SET
  last_ts_1d = EXCLUDED.last_ts_1d,
  last_ts_1h = EXCLUDED.last_ts_1h,
  last_ts_15m = EXCLUDED.last_ts_15m,
  article_count_window = EXCLUDED.article_count_window,
  last_article_at = EXCLUDED.last_article_at,
  fi_metric_count = EXCLUDED.fi_metric_count,
  updated_at = now()
"#;

#[derive(Debug, Clone, Serialize)]
pub struct DerivedSummary {
    pub ok: bool,
    pub financials_sync: u64,
    pub fundamentals_sync: u64,
    pub technical_sync: u64,
    pub indicators_sync: u64,
    pub market_stats_sync: u64,
    pub context_sync: u64,
}

pub struct DerivedSync {
    warehouse: Warehouse,
    context_window_days: i64,
}

impl DerivedSync {
    pub fn new(warehouse: Warehouse, context_window_days: i64) -> Self {
        Self { warehouse, context_window_days }
    }

    pub async fn run(&self) -> Result<DerivedSummary> {
        let pool = self.warehouse.pool();

        let financials = sqlx::query(SQL_FINANCIALS).execute(pool).await?.rows_affected();
        let fundamentals = sqlx::query(SQL_FUNDAMENTALS).execute(pool).await?.rows_affected();
        let technical = sqlx::query(SQL_TECHNICAL).execute(pool).await?.rows_affected();
        let indicators = sqlx::query(SQL_INDICATORS).execute(pool).await?.rows_affected();
        let market_stats = sqlx::query(SQL_MARKET_STATS).execute(pool).await?.rows_affected();
        let context = sqlx::query(SQL_CONTEXT_LATEST)
            .bind(self.context_window_days.to_string())
            .execute(pool)
            .await?
            .rows_affected();

        let summary = DerivedSummary {
            ok: true,
            financials_sync: financials,
            fundamentals_sync: fundamentals,
            technical_sync: technical,
            indicators_sync: indicators,
            market_stats_sync: market_stats,
            context_sync: context,
        };
        info!(summary = %serde_json::to_string(&summary).unwrap_or_default(), "Derived sync done");
        Ok(summary)
    }
}
