use crate::cli::WarehouseArgs;
use crate::error::Result;
use crate::services::candle_source::CandleSource;
use crate::services::repair_worker::RepairWorker;
use crate::services::source_client::SourceClient;

pub async fn run(
    warehouse: WarehouseArgs,
    limit: i64,
    sleep_ms: u64,
    source_base: Option<String>,
) -> Result<()> {
    let wh = super::open_warehouse(&warehouse.pg_url, warehouse.max_connections).await?;
    let source = CandleSource::new(SourceClient::new()?, source_base, "vci-repair");
    let worker = RepairWorker::new(wh, source, sleep_ms);
    let summary = worker.run(limit).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
