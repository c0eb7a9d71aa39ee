use crate::cli::WarehouseArgs;
use crate::error::Result;
use crate::services::news::{DiscoverConfig, NewsDiscovery};
use crate::services::source_client::SourceClient;

pub async fn run(
    warehouse: WarehouseArgs,
    relay_base: Option<String>,
    listing_base: String,
    rss_limit: usize,
    budget_pages: u32,
    rate: f64,
) -> Result<()> {
    let wh = super::open_warehouse(&warehouse.pg_url, warehouse.max_connections).await?;
    let config = DiscoverConfig {
        relay_base,
        listing_base,
        rss_limit,
        budget_pages,
        rate_per_sec: rate,
    };
    let discovery = NewsDiscovery::new(wh, SourceClient::new()?, config);
    let summary = discovery.run().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
