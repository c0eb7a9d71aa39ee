//! Scheduled candle ingestion for one (job, shard).
//!
//! One run: claim the shard lease, take a cursor batch, page OHLCV history
//! per ticker × tf into the warehouse, heartbeat while working, advance the
//! cursor only after commits. Losing the lease aborts the run without
//! touching the cursor — the new owner is the single writer now.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::Tf;
use crate::services::candle_source::CandleSource;
use crate::services::lease::{ClaimOutcome, LeaseCoordinator};
use crate::services::shard::{Cursor, CursorStore, Universe};
use crate::services::warehouse::Warehouse;
use crate::utils::now_ms;

/// Backward pages that fail to move the window edge before we call the
/// frontier reached for a (ticker, tf).
const FRONTIER_STALL_PAGES: u32 = 2;

#[derive(Debug, Clone)]
pub struct CandleSyncConfig {
    pub job_name: String,
    pub node_id: String,
    pub shard_count: u32,
    pub shard_index: u32,
    pub batch_size: usize,
    pub tfs: Vec<Tf>,
    /// Backfill floor per tf, unix ms.
    pub start_1d: i64,
    pub start_1h: i64,
    pub start_15m: i64,
    /// Bars per source page.
    pub chunk: u32,
    pub include_indices: bool,
    pub run_timeout_sec: u64,
    pub stale_minutes: i64,
    pub lease_ms: i64,
    pub sleep_ms: u64,
    pub cursor_dir: PathBuf,
    pub dry_run: bool,
}

impl CandleSyncConfig {
    fn start_for(&self, tf: Tf) -> i64 {
        match tf {
            Tf::D1 => self.start_1d,
            Tf::H1 => self.start_1h,
            Tf::M15 => self.start_15m,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub ok: bool,
    pub job: String,
    pub shard: u32,
    pub skipped: Option<String>,
    pub tickers_processed: usize,
    pub bars_upserted: usize,
    pub pages: usize,
    pub frontier_hits: usize,
    pub errors: usize,
    pub timed_out: bool,
    pub duration_ms: u128,
}

impl RunSummary {
    fn skipped(job: &str, shard: u32, reason: &str, started: Instant) -> Self {
        Self {
            ok: true,
            job: job.to_string(),
            shard,
            skipped: Some(reason.to_string()),
            tickers_processed: 0,
            bars_upserted: 0,
            pages: 0,
            frontier_hits: 0,
            errors: 0,
            timed_out: false,
            duration_ms: started.elapsed().as_millis(),
        }
    }
}

pub struct CandleSync {
    warehouse: Warehouse,
    coordinator: LeaseCoordinator,
    source: CandleSource,
    config: CandleSyncConfig,
}

impl CandleSync {
    pub fn new(warehouse: Warehouse, source: CandleSource, config: CandleSyncConfig) -> Self {
        let coordinator = LeaseCoordinator::new(warehouse.clone());
        Self { warehouse, coordinator, source, config }
    }

    pub async fn run(&self, universe: &Universe) -> Result<RunSummary> {
        let started = Instant::now();
        let cfg = &self.config;
        // Soft ceiling: stop between tickers before the hard timer can fire.
        let soft_deadline = started + Duration::from_secs(cfg.run_timeout_sec).mul_f64(0.9);

        let shard_tickers = universe.shard_tickers(cfg.shard_index, cfg.shard_count);
        if shard_tickers.is_empty() {
            return Ok(RunSummary::skipped(&cfg.job_name, cfg.shard_index, "empty_shard", started));
        }

        let claim = self
            .coordinator
            .try_claim(
                &cfg.job_name,
                cfg.shard_index as i32,
                &cfg.node_id,
                cfg.lease_ms,
                cfg.stale_minutes,
                None,
            )
            .await?;
        match claim {
            ClaimOutcome::Acquired => {}
            ClaimOutcome::Held(holder) => {
                info!(
                    job = %cfg.job_name,
                    shard = cfg.shard_index,
                    holder = %holder.owner_id,
                    lease_until_ms = holder.lease_until_ms,
                    "Shard held elsewhere, skipping run"
                );
                return Ok(RunSummary::skipped(&cfg.job_name, cfg.shard_index, "not_owner", started));
            }
        }

        let store = CursorStore::new(&cfg.cursor_dir, &cfg.job_name, cfg.shard_index);
        let cursor = store.load().await?;
        let (batch, _) = cursor.select_batch(&shard_tickers, cfg.batch_size);
        let start_index = cursor.next_index % shard_tickers.len();

        let mut summary = RunSummary {
            ok: true,
            job: cfg.job_name.clone(),
            shard: cfg.shard_index,
            skipped: None,
            tickers_processed: 0,
            bars_upserted: 0,
            pages: 0,
            frontier_hits: 0,
            errors: 0,
            timed_out: false,
            duration_ms: 0,
        };

        let mut completed = 0usize;
        for ticker in &batch {
            if Instant::now() >= soft_deadline {
                summary.timed_out = true;
                warn!(
                    job = %cfg.job_name,
                    shard = cfg.shard_index,
                    completed,
                    of = batch.len(),
                    "Run budget reached, stopping between tickers"
                );
                break;
            }

            for tf in &cfg.tfs {
                match self.ingest_ticker_tf(ticker, *tf, soft_deadline, &mut summary).await {
                    Ok(()) => {}
                    Err(Error::CoordinationUnavailable(msg)) => {
                        // Includes lost ownership: stop writing, leave the
                        // cursor untouched for the next owner.
                        warn!(job = %cfg.job_name, shard = cfg.shard_index, error = %msg,
                              "Abandoning shard");
                        summary.skipped = Some("lease_lost".to_string());
                        summary.duration_ms = started.elapsed().as_millis();
                        return Ok(summary);
                    }
                    Err(e) => {
                        summary.errors += 1;
                        warn!(ticker = %ticker, tf = %tf, error = %e, "Ticker ingest failed, continuing");
                    }
                }
            }
            completed += 1;
            summary.tickers_processed = completed;
        }

        // Cursor moves only over tickers whose work committed.
        if completed > 0 && !cfg.dry_run {
            let next = Cursor {
                next_index: (start_index + completed) % shard_tickers.len(),
                last_batch: batch[..completed].to_vec(),
                batch_size: cfg.batch_size,
                universe_count: shard_tickers.len(),
                updated_at: Some(chrono::Utc::now().to_rfc3339()),
            };
            store.save(&next).await?;
        }

        summary.duration_ms = started.elapsed().as_millis();
        info!(summary = %serde_json::to_string(&summary).unwrap_or_default(), "Candle sync run done");
        Ok(summary)
    }

    /// Page backward from now to the tf's backfill floor, upserting each
    /// page. Stops at the floor, on an empty page, or when the window edge
    /// stops moving (source frontier).
    async fn ingest_ticker_tf(
        &self,
        ticker: &str,
        tf: Tf,
        soft_deadline: Instant,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let cfg = &self.config;
        let floor = cfg.start_for(tf);
        let mut to_ms = now_ms();
        let mut prev_oldest: Option<i64> = None;
        let mut stall_pages = 0u32;

        loop {
            if Instant::now() >= soft_deadline {
                return Ok(());
            }

            let page = self
                .source
                .fetch_window(ticker, tf, floor, to_ms, cfg.chunk)
                .await?;
            summary.pages += 1;

            if page.is_empty() {
                break;
            }

            let oldest = page.first().map(|c| c.ts).unwrap_or(floor);
            if !cfg.dry_run {
                summary.bars_upserted += self.warehouse.upsert_candles(&page).await?;
            }

            // Heartbeat after every page; a false return means we are no
            // longer the owner.
            let still_owner = self
                .coordinator
                .report_progress(&cfg.job_name, cfg.shard_index as i32, &cfg.node_id, None)
                .await?;
            if !still_owner {
                return Err(Error::CoordinationUnavailable("lease ownership lost".to_string()));
            }
            self.maybe_renew().await?;

            if oldest <= floor {
                break;
            }
            // Source frontier: the window edge stops retreating even though
            // we keep asking for older data. Don't let one ticker spin.
            if prev_oldest.is_some_and(|prev| oldest >= prev) {
                stall_pages += 1;
                if stall_pages >= FRONTIER_STALL_PAGES {
                    summary.frontier_hits += 1;
                    break;
                }
            } else {
                stall_pages = 0;
            }
            prev_oldest = Some(oldest);
            to_ms = (oldest - tf.interval_ms()).min(to_ms - tf.interval_ms());

            if cfg.sleep_ms > 0 {
                sleep(Duration::from_millis(cfg.sleep_ms)).await;
            }
        }
        Ok(())
    }

    /// Renew when under a third of the lease remains.
    async fn maybe_renew(&self) -> Result<()> {
        let cfg = &self.config;
        if let Some(row) = self
            .coordinator
            .get(&cfg.job_name, cfg.shard_index as i32)
            .await?
        {
            if row.owner_id == cfg.node_id && row.lease_until_ms - now_ms() < cfg.lease_ms / 3 {
                self.coordinator
                    .renew(&cfg.job_name, cfg.shard_index as i32, &cfg.node_id, cfg.lease_ms)
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_floor_per_tf() {
        let cfg = CandleSyncConfig {
            job_name: "vn_candles".to_string(),
            node_id: "node-a".to_string(),
            shard_count: 4,
            shard_index: 0,
            batch_size: 10,
            tfs: vec![Tf::D1],
            start_1d: 1,
            start_1h: 2,
            start_15m: 3,
            chunk: 1000,
            include_indices: false,
            run_timeout_sec: 600,
            stale_minutes: 30,
            lease_ms: 300_000,
            sleep_ms: 0,
            cursor_dir: PathBuf::from("/tmp"),
            dry_run: true,
        };
        assert_eq!(cfg.start_for(Tf::D1), 1);
        assert_eq!(cfg.start_for(Tf::H1), 2);
        assert_eq!(cfg.start_for(Tf::M15), 3);
    }
}
