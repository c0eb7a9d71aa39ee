use std::collections::HashMap;

use sqlx::Row;
use tracing::debug;

use super::Warehouse;
use crate::error::Result;
use crate::models::{Candle, LatestCandle, Tf, TopMover};

/// Serialized candle row for API responses.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CandleRow {
    pub ts: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: Option<f64>,
    pub source: Option<String>,
}

impl Warehouse {
    /// Batch upsert keyed on (ticker, tf, ts). The snapshot row for each
    /// (ticker, tf) pair is maintained in the same transaction with a
    /// compare-then-write, so `candles_latest` always holds the max ts.
    pub async fn upsert_candles(&self, rows: &[Candle]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool().begin().await?;

        for candle in rows {
            sqlx::query(
                r#"
                INSERT INTO candles (ticker, tf, ts, o, h, l, c, v, source, ingested_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
                ON CONFLICT (ticker, tf, ts) DO UPDATE SET
                  o = EXCLUDED.o,
                  h = EXCLUDED.h,
                  l = EXCLUDED.l,
                  c = EXCLUDED.c,
                  v = EXCLUDED.v,
                  source = COALESCE(EXCLUDED.source, candles.source),
                  ingested_at = now()
                "#,
            )
            .bind(&candle.ticker)
            .bind(candle.tf.as_str())
            .bind(candle.ts)
            .bind(candle.o)
            .bind(candle.h)
            .bind(candle.l)
            .bind(candle.c)
            .bind(candle.v)
            .bind(&candle.source)
            .execute(&mut *tx)
            .await?;
        }

        // Newest bar per (ticker, tf) in this batch drives the snapshot.
        let mut newest: HashMap<(String, Tf), &Candle> = HashMap::new();
        for candle in rows {
            let key = (candle.ticker.clone(), candle.tf);
            match newest.get(&key) {
                Some(existing) if existing.ts >= candle.ts => {}
                _ => {
                    newest.insert(key, candle);
                }
            }
        }

        for candle in newest.values() {
            sqlx::query(
                r#"
                INSERT INTO candles_latest (ticker, tf, ts, o, h, l, c, v, source, ingested_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
                ON CONFLICT (ticker, tf) DO UPDATE SET
                  ts = EXCLUDED.ts,
                  o = EXCLUDED.o,
                  h = EXCLUDED.h,
                  l = EXCLUDED.l,
                  c = EXCLUDED.c,
                  v = EXCLUDED.v,
                  source = COALESCE(EXCLUDED.source, candles_latest.source),
                  ingested_at = now()
                WHERE candles_latest.ts <= EXCLUDED.ts
                "#,
            )
            .bind(&candle.ticker)
            .bind(candle.tf.as_str())
            .bind(candle.ts)
            .bind(candle.o)
            .bind(candle.h)
            .bind(candle.l)
            .bind(candle.c)
            .bind(candle.v)
            .bind(&candle.source)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(rows = rows.len(), pairs = newest.len(), "Upserted candle batch");
        Ok(rows.len())
    }

    /// Keyset page newest-first; strict `<` on `before_ts` when provided.
    pub async fn query_candles(
        &self,
        ticker: &str,
        tf: Tf,
        before_ts: Option<i64>,
        limit: i64,
    ) -> Result<Vec<CandleRow>> {
        let rows = sqlx::query(
            r#"
            SELECT ts, o, h, l, c, v, source
            FROM candles
            WHERE ticker = $1 AND tf = $2
              AND ($3::int8 IS NULL OR ts < $3)
            ORDER BY ts DESC
            LIMIT $4
            "#,
        )
        .bind(ticker)
        .bind(tf.as_str())
        .bind(before_ts)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(CandleRow {
                    ts: row.try_get("ts")?,
                    o: row.try_get("o")?,
                    h: row.try_get("h")?,
                    l: row.try_get("l")?,
                    c: row.try_get("c")?,
                    v: row.try_get("v")?,
                    source: row.try_get("source")?,
                })
            })
            .collect()
    }

    /// Snapshot rows for one timeframe, newest first.
    pub async fn query_latest(&self, tf: Tf, limit: i64) -> Result<Vec<LatestCandle>> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, tf, ts, o, h, l, c, v, source, ingested_at::text AS ingested_at
            FROM candles_latest
            WHERE tf = $1
            ORDER BY ts DESC, ticker ASC
            LIMIT $2
            "#,
        )
        .bind(tf.as_str())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(LatestCandle {
                    ticker: row.try_get("ticker")?,
                    tf: row.try_get("tf")?,
                    ts: row.try_get("ts")?,
                    o: row.try_get("o")?,
                    h: row.try_get("h")?,
                    l: row.try_get("l")?,
                    c: row.try_get("c")?,
                    v: row.try_get("v")?,
                    source: row.try_get("source")?,
                    ingested_at: row.try_get("ingested_at")?,
                })
            })
            .collect()
    }

    /// Latest close vs the bar before it, ordered by percent change.
    pub async fn query_top_movers(&self, tf: Tf, limit: i64) -> Result<Vec<TopMover>> {
        let rows = sqlx::query(
            r#"
            SELECT l.ticker, l.tf, l.ts AS ts_latest, l.c AS close_latest,
                   p.c AS close_prev,
                   CASE WHEN p.c IS NOT NULL AND p.c <> 0
                        THEN (l.c - p.c) / p.c END AS pct_change
            FROM candles_latest l
            LEFT JOIN LATERAL (
                SELECT c FROM candles
                WHERE ticker = l.ticker AND tf = l.tf AND ts < l.ts
                ORDER BY ts DESC
                LIMIT 1
            ) p ON true
            WHERE l.tf = $1
            ORDER BY pct_change DESC NULLS LAST
            LIMIT $2
            "#,
        )
        .bind(tf.as_str())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(TopMover {
                    ticker: row.try_get("ticker")?,
                    tf: row.try_get("tf")?,
                    ts_latest: row.try_get("ts_latest")?,
                    close_latest: row.try_get("close_latest")?,
                    close_prev: row.try_get("close_prev")?,
                    pct_change: row.try_get("pct_change")?,
                })
            })
            .collect()
    }

    /// Max ts per (ticker, tf) over a lookback window, for gap scanning.
    pub async fn candle_timestamps(
        &self,
        ticker: &str,
        tf: Tf,
        since_ts: i64,
    ) -> Result<Vec<i64>> {
        let rows: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT ts FROM candles
            WHERE ticker = $1 AND tf = $2 AND ts >= $3
            ORDER BY ts ASC
            "#,
        )
        .bind(ticker)
        .bind(tf.as_str())
        .bind(since_ts)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Distinct tickers present for a tf, capped.
    pub async fn candle_tickers(&self, tf: Tf, limit: i64) -> Result<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT ticker FROM candles
            WHERE tf = $1
            ORDER BY ticker
            LIMIT $2
            "#,
        )
        .bind(tf.as_str())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::warehouse::test_warehouse;

    fn bar(ticker: &str, tf: Tf, ts: i64, c: f64) -> Candle {
        Candle {
            ticker: ticker.to_string(),
            tf,
            ts,
            o: 1.0,
            h: 2.0,
            l: 0.5,
            c,
            v: Some(1000.0),
            source: Some("test".to_string()),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_maintains_snapshot() {
        let Some(wh) = test_warehouse().await else { return };
        let ticker = format!("T{}", crate::utils::now_ms() % 100_000);

        let bars = vec![bar(&ticker, Tf::D1, 1_700_000_000_000, 1.5)];
        wh.upsert_candles(&bars).await.unwrap();
        wh.upsert_candles(&bars).await.unwrap();

        let rows = wh.query_candles(&ticker, Tf::D1, None, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ts, 1_700_000_000_000);

        // snapshot advances on newer, holds on older
        let newer = vec![bar(&ticker, Tf::D1, 1_700_086_400_000, 2.0)];
        wh.upsert_candles(&newer).await.unwrap();
        let older = vec![bar(&ticker, Tf::D1, 1_699_913_600_000, 0.9)];
        wh.upsert_candles(&older).await.unwrap();

        let latest = wh.query_latest(Tf::D1, 2000).await.unwrap();
        let snap = latest.iter().find(|r| r.ticker == ticker).unwrap();
        assert_eq!(snap.ts, 1_700_086_400_000);
    }

    #[tokio::test]
    async fn keyset_paging_is_stable() {
        let Some(wh) = test_warehouse().await else { return };
        let ticker = format!("K{}", crate::utils::now_ms() % 100_000);
        let base = 1_700_000_000_000_i64;
        let day = Tf::D1.interval_ms();
        let bars: Vec<Candle> = (0..3).map(|i| bar(&ticker, Tf::D1, base + i * day, 1.0)).collect();
        wh.upsert_candles(&bars).await.unwrap();

        let page1 = wh.query_candles(&ticker, Tf::D1, None, 2).await.unwrap();
        assert_eq!(page1.iter().map(|r| r.ts).collect::<Vec<_>>(), vec![base + 2 * day, base + day]);

        let page2 = wh.query_candles(&ticker, Tf::D1, Some(base + day), 2).await.unwrap();
        assert_eq!(page2.iter().map(|r| r.ts).collect::<Vec<_>>(), vec![base]);

        let page3 = wh.query_candles(&ticker, Tf::D1, Some(base), 2).await.unwrap();
        assert!(page3.is_empty());
    }
}
