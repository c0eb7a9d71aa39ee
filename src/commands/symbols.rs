use crate::cli::WarehouseArgs;
use crate::error::Result;
use crate::services::source_client::SourceClient;
use crate::services::symbols_sync::SymbolsSync;

pub async fn run(
    warehouse: WarehouseArgs,
    base_url: Option<String>,
    floors: String,
    page_size: u32,
    max_pages: u32,
) -> Result<()> {
    let wh = super::open_warehouse(&warehouse.pg_url, warehouse.max_connections).await?;
    let sync = SymbolsSync::new(wh, SourceClient::new()?, base_url, Some(floors));
    let summary = sync.run(page_size, max_pages).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
