use crate::cli::WarehouseArgs;
use crate::error::Result;
use crate::services::news::{FetcherConfig, NewsFetcher};
use crate::services::source_client::SourceClient;

pub async fn run(
    warehouse: WarehouseArgs,
    limit: i64,
    rate: f64,
    render_base: Option<String>,
) -> Result<()> {
    let wh = super::open_warehouse(&warehouse.pg_url, warehouse.max_connections).await?;
    let config = FetcherConfig { render_base, rate_per_sec: rate, link_known_only: true };
    let fetcher = NewsFetcher::new(wh, SourceClient::new()?, config);
    let summary = fetcher.run(limit).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
