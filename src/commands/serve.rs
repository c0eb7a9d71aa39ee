use crate::cli::WarehouseArgs;
use crate::error::Result;
use crate::server;

pub async fn run(warehouse: WarehouseArgs, port: u16, api_key: String) -> Result<()> {
    // The query service keeps a slightly larger pool than the workers, still
    // capped well under the warehouse connection budget.
    let pool_size = warehouse.max_connections.max(4).min(10);
    let wh = super::open_warehouse(&warehouse.pg_url, pool_size).await?;
    server::serve(wh, api_key, port).await
}
