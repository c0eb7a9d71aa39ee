use serde_json::json;

use crate::cli::WarehouseArgs;
use crate::error::Result;
use crate::models::Tf;
use crate::utils::{evaluate_freshness, now_ms};

/// One-shot operational snapshot for humans and cron health checks.
pub async fn run(warehouse: WarehouseArgs) -> Result<()> {
    let wh = super::open_warehouse(&warehouse.pg_url, warehouse.max_connections).await?;

    let db = wh.ping().await?;
    let depth = wh.repair_queue_depth().await?;
    let backfill_done = wh.kv_get("backfill.done").await?.unwrap_or_default() == "1";

    let max_ts = wh
        .market_stat("candles_max_ts")
        .await?
        .and_then(|s| s.value_numeric)
        .map(|v| v as i64);
    let freshness = evaluate_freshness(now_ms(), max_ts, 2 * Tf::D1.interval_ms());

    let mut stats = serde_json::Map::new();
    for stat in wh.market_stats_all().await? {
        stats.insert(
            stat.metric.clone(),
            stat.value_numeric
                .map(|v| json!(v))
                .or_else(|| stat.value_text.as_ref().map(|t| json!(t)))
                .unwrap_or(json!(null)),
        );
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "db": db,
            "repairQueue": depth,
            "candlesFrontier": freshness,
            "newsBackfillDone": backfill_done,
            "marketStats": stats,
        }))?
    );
    Ok(())
}
