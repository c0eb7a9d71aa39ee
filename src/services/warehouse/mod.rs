//! Canonical time-series warehouse (Timescale/Postgres) and its typed
//! upsert/query primitives. Everything durable lives here; workers hold only
//! transient fetch buffers and lease handles.

pub mod articles;
pub mod candles;
pub mod corporate_actions;
pub mod fundamentals;
pub mod kv;
pub mod repair;
pub mod symbols;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::error::Result;

/// Hypertable chunk interval: 30 days in ms.
const CHUNK_INTERVAL_MS: i64 = 30 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct Warehouse {
    pool: PgPool,
}

/// Core DDL. Every statement is IF NOT EXISTS so migrations compose across
/// worker versions racing on startup.
const DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS candles (
        ticker text NOT NULL,
        tf text NOT NULL,
        ts int8 NOT NULL,
        o float8 NOT NULL,
        h float8 NOT NULL,
        l float8 NOT NULL,
        c float8 NOT NULL,
        v float8,
        source text,
        ingested_at timestamptz NOT NULL DEFAULT now(),
        PRIMARY KEY (ticker, tf, ts)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_candles_ticker_tf_ts ON candles (ticker, tf, ts DESC)",
    "CREATE INDEX IF NOT EXISTS idx_candles_tf_ts ON candles (tf, ts DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS candles_latest (
        ticker text NOT NULL,
        tf text NOT NULL,
        ts int8 NOT NULL,
        o float8 NOT NULL,
        h float8 NOT NULL,
        l float8 NOT NULL,
        c float8 NOT NULL,
        v float8,
        source text,
        ingested_at timestamptz NOT NULL DEFAULT now(),
        PRIMARY KEY (ticker, tf)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_candles_latest_tf_ts ON candles_latest (tf, ts DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS leases (
        job text NOT NULL,
        shard int NOT NULL,
        owner_id text NOT NULL,
        lease_until_ms int8 NOT NULL,
        last_progress_ms int8 NOT NULL,
        meta text,
        updated_at int8 NOT NULL,
        PRIMARY KEY (job, shard)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS candle_repair_queue (
        id bigserial PRIMARY KEY,
        ticker text NOT NULL,
        tf text NOT NULL,
        window_start_ts int8 NOT NULL,
        window_end_ts int8 NOT NULL,
        expected_bars int,
        note text,
        status text NOT NULL DEFAULT 'queued'
            CHECK (status IN ('queued','running','done','error')),
        attempts int NOT NULL DEFAULT 0,
        last_error text,
        created_at timestamptz NOT NULL DEFAULT now(),
        updated_at timestamptz NOT NULL DEFAULT now(),
        UNIQUE (ticker, tf, window_start_ts, window_end_ts)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS candle_repairs (
        id bigserial PRIMARY KEY,
        ticker text NOT NULL,
        tf text NOT NULL,
        window_start_ts int8 NOT NULL,
        window_end_ts int8 NOT NULL,
        missing_count int,
        note text,
        created_at timestamptz NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS symbols (
        ticker text PRIMARY KEY,
        name text,
        exchange text,
        active boolean,
        updated_at int8
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS articles (
        url text PRIMARY KEY,
        canonical_url text,
        source text NOT NULL,
        title text NOT NULL,
        published_at timestamptz,
        feed_url text,
        discovered_at timestamptz NOT NULL DEFAULT now(),
        fetched_at timestamptz,
        fetch_status text NOT NULL DEFAULT 'pending',
        fetch_method text,
        fetch_error text,
        text text,
        content_sha256 text,
        word_count int,
        lang text,
        ingested_at timestamptz NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_articles_status ON articles (fetch_status, discovered_at)",
    "CREATE INDEX IF NOT EXISTS idx_articles_published ON articles (published_at DESC, url DESC)",
    r#"
    CREATE INDEX IF NOT EXISTS idx_articles_fts ON articles
    USING GIN (to_tsvector('simple', coalesce(title,'') || ' ' || coalesce(text,'')))
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS article_symbols (
        article_url text NOT NULL REFERENCES articles(url),
        ticker text NOT NULL,
        confidence float8 NOT NULL,
        method text NOT NULL,
        PRIMARY KEY (article_url, ticker)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_article_symbols_ticker ON article_symbols (ticker)",
    r#"
    CREATE TABLE IF NOT EXISTS fi_latest (
        ticker text NOT NULL,
        period text NOT NULL,
        statement text NOT NULL,
        period_date date,
        metric text NOT NULL,
        value float8,
        fetched_at text,
        ingested_at timestamptz NOT NULL DEFAULT now(),
        PRIMARY KEY (ticker, period, statement, metric)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_fi_latest_metric ON fi_latest (metric, period, value DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS fi_points (
        ticker text NOT NULL,
        period text NOT NULL,
        statement text NOT NULL,
        period_date date NOT NULL,
        period_date_name text,
        metric text NOT NULL,
        value float8,
        fetched_at text,
        PRIMARY KEY (ticker, period, statement, period_date, metric)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS feeds (
        feed_url text PRIMARY KEY,
        last_seen_published_at text,
        last_checked_at timestamptz,
        updated_at timestamptz NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS seeds (
        seed_url text PRIMARY KEY,
        channel_id int,
        enabled boolean NOT NULL DEFAULT true
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS crawl_state (
        seed_url text PRIMARY KEY,
        next_page int NOT NULL DEFAULT 1,
        done boolean NOT NULL DEFAULT false,
        no_new_pages_count int NOT NULL DEFAULT 0,
        oldest_seen_published_at text,
        last_crawled_at timestamptz,
        last_error text
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS corporate_actions (
        id text PRIMARY KEY,
        ticker text NOT NULL,
        exchange text,
        ex_date date,
        record_date date,
        pay_date date,
        event_type text,
        headline text,
        source text NOT NULL,
        source_url text,
        ingested_at timestamptz NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_ca_ex_date ON corporate_actions (ex_date DESC, id DESC)",
    "CREATE INDEX IF NOT EXISTS idx_ca_ticker ON corporate_actions (ticker, ex_date DESC, id DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS control_kv (
        key text PRIMARY KEY,
        value text NOT NULL,
        updated_at timestamptz NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS market_stats (
        metric text PRIMARY KEY,
        value_numeric float8,
        value_text text,
        asof_ts int8,
        updated_at timestamptz NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS financials (
        ticker text NOT NULL,
        period text NOT NULL,
        statement text NOT NULL,
        period_date date,
        metric text NOT NULL,
        value float8,
        source text NOT NULL DEFAULT 'fi_latest',
        updated_at timestamptz NOT NULL DEFAULT now(),
        PRIMARY KEY (ticker, period, statement, metric)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fundamentals (
        ticker text NOT NULL,
        metric text NOT NULL,
        value float8,
        period text,
        period_date date,
        source text NOT NULL DEFAULT 'financials',
        updated_at timestamptz NOT NULL DEFAULT now(),
        PRIMARY KEY (ticker, metric)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS technical_indicators (
        ticker text NOT NULL,
        tf text NOT NULL,
        asof_ts int8 NOT NULL,
        close float8,
        sma20 float8,
        sma50 float8,
        ema20 float8,
        updated_at timestamptz NOT NULL DEFAULT now(),
        PRIMARY KEY (ticker, tf)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS indicators (
        ticker text NOT NULL,
        tf text NOT NULL,
        indicator text NOT NULL,
        value float8,
        asof_ts int8 NOT NULL,
        updated_at timestamptz NOT NULL DEFAULT now(),
        PRIMARY KEY (ticker, tf, indicator)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS symbol_context_latest (
        ticker text PRIMARY KEY,
        last_ts_1d int8,
        last_ts_1h int8,
        last_ts_15m int8,
        article_count_window int NOT NULL DEFAULT 0,
        last_article_at timestamptz,
        fi_metric_count int NOT NULL DEFAULT 0,
        updated_at timestamptz NOT NULL DEFAULT now()
    )
    "#,
];

/// Timescale-only statements; tolerated to fail on plain Postgres.
const TIMESCALE_DDL: &[&str] = &[
    "SELECT create_hypertable('candles', 'ts', chunk_time_interval => 2592000000, if_not_exists => TRUE)",
    "ALTER TABLE candles SET (timescaledb.compress, timescaledb.compress_segmentby = 'ticker,tf', timescaledb.compress_orderby = 'ts')",
    "SELECT add_compression_policy('candles', compress_after => 1209600000, if_not_exists => TRUE)",
];

impl Warehouse {
    /// Connect with a small fixed pool. Every pooled connection carries a
    /// 30s statement timeout.
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(15))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("SET statement_timeout = '30s'")
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(dsn)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the schema. Compression chunk window: 14 days in ms.
    pub async fn init_schema(&self) -> Result<()> {
        for stmt in DDL {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        for stmt in TIMESCALE_DDL {
            if let Err(e) = sqlx::query(stmt).execute(&self.pool).await {
                debug!(error = %e, "Timescale DDL skipped (extension not present?)");
            }
        }
        info!(chunk_interval_ms = CHUNK_INTERVAL_MS, "Warehouse schema ready");
        Ok(())
    }

    /// SELECT 1 probe for /healthz.
    pub async fn ping(&self) -> Result<i32> {
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one)
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Warehouse connection pool closed");
    }
}

#[cfg(test)]
pub(crate) async fn test_warehouse() -> Option<Warehouse> {
    let dsn = std::env::var("TEST_PG_URL").ok()?;
    let wh = Warehouse::connect(&dsn, 4).await.ok()?;
    wh.init_schema().await.ok()?;
    Some(wh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_applies_and_pings() {
        let Some(wh) = test_warehouse().await else { return };
        assert_eq!(wh.ping().await.unwrap(), 1);
        // idempotent
        wh.init_schema().await.unwrap();
    }
}
