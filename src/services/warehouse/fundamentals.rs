use sqlx::Row;

use super::Warehouse;
use crate::error::Result;
use crate::models::{FiPoint, Period, Statement};

/// One `fi_latest` row as served by the API.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FiLatestRow {
    pub ticker: String,
    pub period: String,
    pub statement: String,
    pub period_date: Option<String>,
    pub metric: String,
    pub value: Option<f64>,
    pub fetched_at: Option<String>,
}

impl Warehouse {
    /// Historical points: pk (ticker, period, statement, period_date, metric);
    /// re-observation replaces value, name, and fetched_at.
    pub async fn upsert_fi_points(&self, points: &[FiPoint]) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool().begin().await?;
        let mut written = 0usize;
        for p in points {
            // Points without a parseable period date can't join the pk.
            let Some(period_date) = p.period_date else { continue };
            sqlx::query(
                r#"
                INSERT INTO fi_points
                  (ticker, period, statement, period_date, period_date_name, metric, value, fetched_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (ticker, period, statement, period_date, metric) DO UPDATE SET
                  value = EXCLUDED.value,
                  period_date_name = COALESCE(EXCLUDED.period_date_name, fi_points.period_date_name),
                  fetched_at = EXCLUDED.fetched_at
                "#,
            )
            .bind(&p.ticker)
            .bind(p.period.as_str())
            .bind(p.statement.as_str())
            .bind(period_date)
            .bind(&p.period_date_name)
            .bind(&p.metric)
            .bind(p.value)
            .bind(&p.fetched_at)
            .execute(&mut *tx)
            .await?;
            written += 1;
        }
        tx.commit().await?;
        Ok(written)
    }

    /// Full refresh of the latest-by-metric view for the periods present in
    /// `rows`, in one transaction so readers never see a half-replaced set.
    pub async fn replace_fi_latest(&self, rows: &[FiPoint]) -> Result<usize> {
        let mut periods: Vec<&str> = rows.iter().map(|r| r.period.as_str()).collect();
        periods.sort();
        periods.dedup();
        if periods.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool().begin().await?;
        for period in &periods {
            sqlx::query("DELETE FROM fi_latest WHERE period = $1")
                .bind(period)
                .execute(&mut *tx)
                .await?;
        }
        for r in rows {
            sqlx::query(
                r#"
                INSERT INTO fi_latest
                  (ticker, period, statement, period_date, metric, value, fetched_at, ingested_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, now())
                ON CONFLICT (ticker, period, statement, metric) DO UPDATE SET
                  period_date = EXCLUDED.period_date,
                  value = EXCLUDED.value,
                  fetched_at = COALESCE(EXCLUDED.fetched_at, fi_latest.fetched_at),
                  ingested_at = now()
                "#,
            )
            .bind(&r.ticker)
            .bind(r.period.as_str())
            .bind(r.statement.as_str())
            .bind(r.period_date)
            .bind(&r.metric)
            .bind(r.value)
            .bind(&r.fetched_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    /// Promote latest period_date per (ticker, period, statement, metric)
    /// from fi_points into fi_latest. Idempotent.
    pub async fn sync_fi_latest_from_points(&self, period: Period) -> Result<u64> {
        let res = sqlx::query(
            r#"
            INSERT INTO fi_latest (ticker, period, statement, period_date, metric, value, fetched_at, ingested_at)
            SELECT f.ticker, f.period, f.statement, f.period_date, f.metric, f.value, f.fetched_at, now()
            FROM fi_points f
            JOIN (
              SELECT ticker, period, statement, metric, MAX(period_date) AS max_period_date
              FROM fi_points
              WHERE period = $1
              GROUP BY ticker, period, statement, metric
            ) x ON f.ticker = x.ticker
               AND f.period = x.period
               AND f.statement = x.statement
               AND f.metric = x.metric
               AND f.period_date = x.max_period_date
            ON CONFLICT (ticker, period, statement, metric) DO UPDATE SET
              period_date = EXCLUDED.period_date,
              value = EXCLUDED.value,
              fetched_at = COALESCE(EXCLUDED.fetched_at, fi_latest.fetched_at),
              ingested_at = now()
            "#,
        )
        .bind(period.as_str())
        .execute(self.pool())
        .await?;
        Ok(res.rows_affected())
    }

    pub async fn query_fi_latest(
        &self,
        ticker: &str,
        period: Period,
        statement: Option<Statement>,
        limit: i64,
    ) -> Result<Vec<FiLatestRow>> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, period, statement, period_date::text AS period_date,
                   metric, value, fetched_at
            FROM fi_latest
            WHERE ticker = $1 AND period = $2
              AND ($3::text IS NULL OR statement = $3)
            ORDER BY statement, metric
            LIMIT $4
            "#,
        )
        .bind(ticker)
        .bind(period.as_str())
        .bind(statement.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(row_to_fi).collect()
    }

    /// Numeric screen over fi_latest: bounded metric values ordered
    /// `value DESC NULLS LAST`.
    pub async fn screen_fi_latest(
        &self,
        metric: &str,
        period: Period,
        statement: Option<Statement>,
        min: Option<f64>,
        max: Option<f64>,
        limit: i64,
    ) -> Result<Vec<FiLatestRow>> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, period, statement, period_date::text AS period_date,
                   metric, value, fetched_at
            FROM fi_latest
            WHERE metric = $1 AND period = $2
              AND ($3::text IS NULL OR statement = $3)
              AND ($4::float8 IS NULL OR value >= $4)
              AND ($5::float8 IS NULL OR value <= $5)
            ORDER BY value DESC NULLS LAST, ticker ASC
            LIMIT $6
            "#,
        )
        .bind(metric)
        .bind(period.as_str())
        .bind(statement.map(|s| s.as_str()))
        .bind(min)
        .bind(max)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(row_to_fi).collect()
    }
}

fn row_to_fi(row: sqlx::postgres::PgRow) -> Result<FiLatestRow> {
    Ok(FiLatestRow {
        ticker: row.try_get("ticker")?,
        period: row.try_get("period")?,
        statement: row.try_get("statement")?,
        period_date: row.try_get("period_date")?,
        metric: row.try_get("metric")?,
        value: row.try_get("value")?,
        fetched_at: row.try_get("fetched_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::normalize_period_date;
    use crate::services::warehouse::test_warehouse;

    #[tokio::test]
    async fn fi_point_upsert_replaces_value() {
        let Some(wh) = test_warehouse().await else { return };
        let ticker = format!("F{}", crate::utils::now_ms() % 100_000);
        let mut point = FiPoint {
            ticker: ticker.clone(),
            period: Period::Q,
            statement: Statement::Is,
            period_date: normalize_period_date("2025-12"),
            period_date_name: Some("Q4/2025".to_string()),
            metric: "is1".to_string(),
            value: Some(10.0),
            fetched_at: "2026-01-01T00:00:00Z".to_string(),
        };
        wh.upsert_fi_points(std::slice::from_ref(&point)).await.unwrap();
        point.value = Some(11.0);
        wh.upsert_fi_points(std::slice::from_ref(&point)).await.unwrap();

        let n: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM fi_points WHERE ticker = $1",
        )
        .bind(&ticker)
        .fetch_one(wh.pool())
        .await
        .unwrap();
        assert_eq!(n, 1);

        wh.sync_fi_latest_from_points(Period::Q).await.unwrap();
        let rows = wh.query_fi_latest(&ticker, Period::Q, None, 100).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, Some(11.0));
    }
}
