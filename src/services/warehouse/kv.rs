use sqlx::Row;

use super::Warehouse;
use crate::error::Result;

/// One `market_stats` KPI row.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MarketStat {
    pub metric: String,
    pub value_numeric: Option<f64>,
    pub value_text: Option<String>,
    pub asof_ts: Option<i64>,
}

impl Warehouse {
    pub async fn market_stats_all(&self) -> Result<Vec<MarketStat>> {
        let rows = sqlx::query(
            "SELECT metric, value_numeric, value_text, asof_ts FROM market_stats ORDER BY metric",
        )
        .fetch_all(self.pool())
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(MarketStat {
                    metric: row.try_get("metric")?,
                    value_numeric: row.try_get("value_numeric")?,
                    value_text: row.try_get("value_text")?,
                    asof_ts: row.try_get("asof_ts")?,
                })
            })
            .collect()
    }

    pub async fn market_stat(&self, metric: &str) -> Result<Option<MarketStat>> {
        let row = sqlx::query(
            "SELECT metric, value_numeric, value_text, asof_ts FROM market_stats WHERE metric = $1",
        )
        .bind(metric)
        .fetch_optional(self.pool())
        .await?;
        row.map(|row| {
            Ok(MarketStat {
                metric: row.try_get("metric")?,
                value_numeric: row.try_get("value_numeric")?,
                value_text: row.try_get("value_text")?,
                asof_ts: row.try_get("asof_ts")?,
            })
        })
        .transpose()
    }

    /// Small control flags ("backfill.done" and friends).
    pub async fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO control_kv (key, value) VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM control_kv WHERE key = $1")
                .bind(key)
                .fetch_optional(self.pool())
                .await?;
        Ok(value)
    }
}
