use chrono::NaiveDate;
use sqlx::Row;

use super::Warehouse;
use crate::error::Result;
use crate::models::CorporateAction;

/// Keyset cursor over (ex_date DESC, id DESC).
#[derive(Debug, Clone)]
pub struct CaCursor {
    pub before_ex_date: NaiveDate,
    pub before_id: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CaRow {
    pub id: String,
    pub ticker: String,
    pub exchange: Option<String>,
    pub ex_date: Option<String>,
    pub record_date: Option<String>,
    pub pay_date: Option<String>,
    pub event_type: Option<String>,
    pub headline: Option<String>,
    pub source: String,
    pub source_url: Option<String>,
}

impl Warehouse {
    pub async fn upsert_corporate_actions(&self, rows: &[CorporateAction]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool().begin().await?;
        for ca in rows {
            sqlx::query(
                r#"
                INSERT INTO corporate_actions
                  (id, ticker, exchange, ex_date, record_date, pay_date,
                   event_type, headline, source, source_url)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO UPDATE SET
                  ex_date = COALESCE(EXCLUDED.ex_date, corporate_actions.ex_date),
                  record_date = COALESCE(EXCLUDED.record_date, corporate_actions.record_date),
                  pay_date = COALESCE(EXCLUDED.pay_date, corporate_actions.pay_date),
                  headline = COALESCE(EXCLUDED.headline, corporate_actions.headline),
                  ingested_at = now()
                "#,
            )
            .bind(&ca.id)
            .bind(&ca.ticker)
            .bind(&ca.exchange)
            .bind(ca.ex_date)
            .bind(ca.record_date)
            .bind(ca.pay_date)
            .bind(&ca.event_type)
            .bind(&ca.headline)
            .bind(&ca.source)
            .bind(&ca.source_url)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    pub async fn query_corporate_actions(
        &self,
        ticker: Option<&str>,
        cursor: Option<&CaCursor>,
        limit: i64,
    ) -> Result<Vec<CaRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, ticker, exchange,
                   ex_date::text AS ex_date,
                   record_date::text AS record_date,
                   pay_date::text AS pay_date,
                   event_type, headline, source, source_url
            FROM corporate_actions
            WHERE ($1::text IS NULL OR ticker = $1)
              AND ($2::date IS NULL
                   OR ex_date < $2
                   OR (ex_date = $2 AND id < $3))
            ORDER BY ex_date DESC NULLS LAST, id DESC
            LIMIT $4
            "#,
        )
        .bind(ticker)
        .bind(cursor.map(|c| c.before_ex_date))
        .bind(cursor.map(|c| c.before_id.clone()))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(CaRow {
                    id: row.try_get("id")?,
                    ticker: row.try_get("ticker")?,
                    exchange: row.try_get("exchange")?,
                    ex_date: row.try_get("ex_date")?,
                    record_date: row.try_get("record_date")?,
                    pay_date: row.try_get("pay_date")?,
                    event_type: row.try_get("event_type")?,
                    headline: row.try_get("headline")?,
                    source: row.try_get("source")?,
                    source_url: row.try_get("source_url")?,
                })
            })
            .collect()
    }
}
