use crate::cli::WarehouseArgs;
use crate::error::Result;
use crate::services::derived_sync::DerivedSync;

pub async fn run(warehouse: WarehouseArgs, context_window_days: i64) -> Result<()> {
    let wh = super::open_warehouse(&warehouse.pg_url, warehouse.max_connections).await?;
    let sync = DerivedSync::new(wh, context_window_days);
    let summary = sync.run().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
