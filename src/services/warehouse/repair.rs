use sqlx::Row;
use tracing::debug;

use super::Warehouse;
use crate::constants::MAX_STORED_ERROR_LEN;
use crate::error::Result;
use crate::models::Tf;
use crate::utils::truncate_chars;

/// One claimed repair-queue entry.
#[derive(Debug, Clone)]
pub struct RepairJob {
    pub id: i64,
    pub ticker: String,
    pub tf: Tf,
    pub window_start_ts: i64,
    pub window_end_ts: i64,
    pub attempts: i32,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RepairQueueDepth {
    pub queued: i64,
    pub running: i64,
    pub done: i64,
    pub error: i64,
}

impl Warehouse {
    /// Enqueue one missing window. Dedup key is the four-tuple; `queued` and
    /// `running` rows get their expectation refreshed, `done` rows are left
    /// alone for audit.
    pub async fn enqueue_repair(
        &self,
        ticker: &str,
        tf: Tf,
        window_start_ts: i64,
        window_end_ts: i64,
        expected_bars: i32,
        note: &str,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO candle_repair_queue
              (ticker, tf, window_start_ts, window_end_ts, expected_bars, note)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (ticker, tf, window_start_ts, window_end_ts) DO UPDATE SET
              expected_bars = EXCLUDED.expected_bars,
              note = EXCLUDED.note,
              updated_at = now()
            WHERE candle_repair_queue.status IN ('queued', 'running')
            "#,
        )
        .bind(ticker)
        .bind(tf.as_str())
        .bind(window_start_ts)
        .bind(window_end_ts)
        .bind(expected_bars)
        .bind(note)
        .execute(self.pool())
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Claim up to `limit` queued entries oldest-first and move them to
    /// `running`. SKIP LOCKED keeps concurrent repair workers from fighting
    /// over the same rows.
    pub async fn claim_repairs(&self, limit: i64) -> Result<Vec<RepairJob>> {
        let mut tx = self.pool().begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, ticker, tf, window_start_ts, window_end_ts, attempts
            FROM candle_repair_queue
            WHERE status = 'queued'
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let tf_str: String = row.try_get("tf")?;
            jobs.push(RepairJob {
                id: row.try_get("id")?,
                ticker: row.try_get("ticker")?,
                tf: Tf::parse(&tf_str)?,
                window_start_ts: row.try_get("window_start_ts")?,
                window_end_ts: row.try_get("window_end_ts")?,
                attempts: row.try_get("attempts")?,
            });
        }

        if !jobs.is_empty() {
            let ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
            sqlx::query(
                r#"
                UPDATE candle_repair_queue
                SET status = 'running', attempts = attempts + 1, updated_at = now()
                WHERE id = ANY($1)
                "#,
            )
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(claimed = jobs.len(), "Claimed repair jobs");
        Ok(jobs)
    }

    pub async fn finish_repair(&self, id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE candle_repair_queue
            SET status = 'done', updated_at = now(), last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn fail_repair(&self, id: i64, err: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE candle_repair_queue
            SET status = 'error', updated_at = now(), last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(truncate_chars(err, MAX_STORED_ERROR_LEN))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Audit trail: one row per completed repair attempt.
    pub async fn record_repair_audit(
        &self,
        ticker: &str,
        tf: Tf,
        window_start_ts: i64,
        window_end_ts: i64,
        missing_count: i32,
        note: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO candle_repairs
              (ticker, tf, window_start_ts, window_end_ts, missing_count, note)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(ticker)
        .bind(tf.as_str())
        .bind(window_start_ts)
        .bind(window_end_ts)
        .bind(missing_count)
        .bind(note)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn repair_queue_depth(&self) -> Result<RepairQueueDepth> {
        let rows = sqlx::query(
            "SELECT status, count(*) AS n FROM candle_repair_queue GROUP BY status",
        )
        .fetch_all(self.pool())
        .await?;

        let mut depth = RepairQueueDepth::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            match status.as_str() {
                "queued" => depth.queued = n,
                "running" => depth.running = n,
                "done" => depth.done = n,
                "error" => depth.error = n,
                _ => {}
            }
        }
        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::warehouse::test_warehouse;

    #[tokio::test]
    async fn repair_lifecycle_dedupes_and_preserves_done() {
        let Some(wh) = test_warehouse().await else { return };
        let ticker = format!("R{}", crate::utils::now_ms() % 100_000);
        let (ws, we) = (1_700_000_000_000_i64, 1_700_086_400_000_i64);

        assert!(wh.enqueue_repair(&ticker, Tf::D1, ws, we, 2, "gap").await.unwrap());
        // same window: refresh, no second row
        wh.enqueue_repair(&ticker, Tf::D1, ws, we, 3, "gap again").await.unwrap();
        let n: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM candle_repair_queue WHERE ticker = $1",
        )
        .bind(&ticker)
        .fetch_one(wh.pool())
        .await
        .unwrap();
        assert_eq!(n, 1);

        let jobs = wh.claim_repairs(500).await.unwrap();
        let job = jobs.iter().find(|j| j.ticker == ticker).unwrap();
        assert_eq!(job.attempts, 0);
        wh.finish_repair(job.id).await.unwrap();

        // done rows are not resurrected
        let touched = wh.enqueue_repair(&ticker, Tf::D1, ws, we, 5, "again").await.unwrap();
        assert!(!touched);
        let status: String = sqlx::query_scalar(
            "SELECT status FROM candle_repair_queue WHERE id = $1",
        )
        .bind(job.id)
        .fetch_one(wh.pool())
        .await
        .unwrap();
        assert_eq!(status, "done");
    }
}
