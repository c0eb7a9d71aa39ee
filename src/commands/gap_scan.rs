use crate::cli::WarehouseArgs;
use crate::error::Result;
use crate::models::Tf;
use crate::services::gap_detector::GapDetector;

pub async fn run(
    warehouse: WarehouseArgs,
    tf: String,
    lookback_days: i64,
    limit_tickers: i64,
) -> Result<()> {
    let wh = super::open_warehouse(&warehouse.pg_url, warehouse.max_connections).await?;
    let detector = GapDetector::new(wh);
    let summary = detector.scan(Tf::parse(&tf)?, lookback_days, limit_tickers).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
