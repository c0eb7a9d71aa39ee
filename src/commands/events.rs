use crate::cli::WarehouseArgs;
use crate::error::Result;
use crate::services::corporate_actions::EventsIngest;
use crate::services::source_client::SourceClient;

pub async fn run(warehouse: WarehouseArgs, base_url: String, max_pages: u32) -> Result<()> {
    let wh = super::open_warehouse(&warehouse.pg_url, warehouse.max_connections).await?;
    let ingest = EventsIngest::new(wh, SourceClient::new()?, base_url);
    let summary = ingest.run(max_pages).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
