use sqlx::Row;

use super::Warehouse;
use crate::error::Result;
use crate::models::Symbol;

/// Per-ticker context snapshot maintained by the derived sync.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SymbolContext {
    pub ticker: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub active: Option<bool>,
    pub last_ts_1d: Option<i64>,
    pub last_ts_1h: Option<i64>,
    pub last_ts_15m: Option<i64>,
    pub article_count_window: i32,
    pub last_article_at: Option<String>,
    pub fi_metric_count: i32,
}

impl Warehouse {
    pub async fn symbol_context(&self, ticker: &str) -> Result<Option<SymbolContext>> {
        let row = sqlx::query(
            r#"
            SELECT s.ticker, s.name, s.exchange, s.active,
                   c.last_ts_1d, c.last_ts_1h, c.last_ts_15m,
                   COALESCE(c.article_count_window, 0) AS article_count_window,
                   c.last_article_at::text AS last_article_at,
                   COALESCE(c.fi_metric_count, 0) AS fi_metric_count
            FROM symbols s
            LEFT JOIN symbol_context_latest c ON c.ticker = s.ticker
            WHERE s.ticker = $1
            "#,
        )
        .bind(ticker)
        .fetch_optional(self.pool())
        .await?;

        row.map(|row| {
            Ok(SymbolContext {
                ticker: row.try_get("ticker")?,
                name: row.try_get("name")?,
                exchange: row.try_get("exchange")?,
                active: row.try_get("active")?,
                last_ts_1d: row.try_get("last_ts_1d")?,
                last_ts_1h: row.try_get("last_ts_1h")?,
                last_ts_15m: row.try_get("last_ts_15m")?,
                article_count_window: row.try_get("article_count_window")?,
                last_article_at: row.try_get("last_article_at")?,
                fi_metric_count: row.try_get("fi_metric_count")?,
            })
        })
        .transpose()
    }

    /// Merge-upsert symbol metadata. Fields only ever get richer and
    /// `updated_at` only moves forward.
    pub async fn upsert_symbols(&self, rows: &[Symbol]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool().begin().await?;
        for s in rows {
            sqlx::query(
                r#"
                INSERT INTO symbols (ticker, name, exchange, active, updated_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (ticker) DO UPDATE SET
                  name = COALESCE(EXCLUDED.name, symbols.name),
                  exchange = COALESCE(EXCLUDED.exchange, symbols.exchange),
                  active = COALESCE(EXCLUDED.active, symbols.active),
                  updated_at = GREATEST(COALESCE(symbols.updated_at, 0), EXCLUDED.updated_at)
                "#,
            )
            .bind(&s.ticker)
            .bind(&s.name)
            .bind(&s.exchange)
            .bind(s.active)
            .bind(s.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    /// Tickers for universe loading. `filter_sql` is an optional trusted
    /// operator-supplied WHERE fragment (e.g. "active = true").
    pub async fn universe_tickers(&self, filter_sql: Option<&str>) -> Result<Vec<String>> {
        let sql = match filter_sql {
            Some(clause) => format!(
                "SELECT ticker FROM symbols WHERE {} ORDER BY ticker",
                clause
            ),
            None => "SELECT ticker FROM symbols ORDER BY ticker".to_string(),
        };
        let tickers: Vec<String> = sqlx::query_scalar(&sql).fetch_all(self.pool()).await?;
        Ok(tickers)
    }

    /// Ensure a ticker row exists (first sighting from any source).
    pub async fn ensure_symbol(&self, ticker: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO symbols (ticker) VALUES ($1) ON CONFLICT (ticker) DO NOTHING",
        )
        .bind(ticker)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn known_tickers(&self) -> Result<Vec<String>> {
        let tickers: Vec<String> =
            sqlx::query_scalar("SELECT ticker FROM symbols ORDER BY ticker")
                .fetch_all(self.pool())
                .await?;
        Ok(tickers)
    }
}
