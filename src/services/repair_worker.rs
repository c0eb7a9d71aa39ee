//! Drains `candle_repair_queue`: refetch each missing window and upsert.
//! One audit row is written per repair regardless of outcome count, so the
//! history of what was healed survives queue-row reuse.

use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::Result;
use crate::services::candle_source::CandleSource;
use crate::services::warehouse::Warehouse;
use crate::utils::ms_to_date;

#[derive(Debug, Clone, Serialize)]
pub struct RepairRunSummary {
    pub ok: bool,
    pub processed: usize,
    pub failed: usize,
}

pub struct RepairWorker {
    warehouse: Warehouse,
    source: CandleSource,
    sleep_ms: u64,
}

impl RepairWorker {
    pub fn new(warehouse: Warehouse, source: CandleSource, sleep_ms: u64) -> Self {
        Self { warehouse, source, sleep_ms }
    }

    pub async fn run(&self, limit: i64) -> Result<RepairRunSummary> {
        let jobs = self.warehouse.claim_repairs(limit).await?;
        if jobs.is_empty() {
            info!("Repair queue empty");
            return Ok(RepairRunSummary { ok: true, processed: 0, failed: 0 });
        }

        let mut processed = 0usize;
        let mut failed = 0usize;
        for job in &jobs {
            // Window bounds are inclusive bar timestamps; pad countBack a
            // little so the source returns the full region.
            let bars = (job.window_end_ts - job.window_start_ts) / job.tf.interval_ms() + 1;
            let count_back = (bars as u32).saturating_add(10);

            let fetched = self
                .source
                .fetch_window(
                    &job.ticker,
                    job.tf,
                    job.window_start_ts,
                    job.window_end_ts,
                    count_back,
                )
                .await;

            match fetched {
                Ok(rows) => {
                    let upserted = self.warehouse.upsert_candles(&rows).await?;
                    self.warehouse.finish_repair(job.id).await?;
                    self.warehouse
                        .record_repair_audit(
                            &job.ticker,
                            job.tf,
                            job.window_start_ts,
                            job.window_end_ts,
                            (bars as i32).saturating_sub(upserted as i32).max(0),
                            &format!(
                                "repair {}..{}: fetched {} of {} expected",
                                ms_to_date(job.window_start_ts),
                                ms_to_date(job.window_end_ts),
                                upserted,
                                bars
                            ),
                        )
                        .await?;
                    processed += 1;
                }
                Err(e) => {
                    warn!(ticker = %job.ticker, tf = %job.tf, id = job.id, error = %e, "Repair failed");
                    self.warehouse.fail_repair(job.id, &e.to_string()).await?;
                    failed += 1;
                }
            }

            if self.sleep_ms > 0 {
                sleep(Duration::from_millis(self.sleep_ms)).await;
            }
        }

        let summary = RepairRunSummary { ok: true, processed, failed };
        info!(summary = %serde_json::to_string(&summary).unwrap_or_default(), "Repair run done");
        Ok(summary)
    }
}
