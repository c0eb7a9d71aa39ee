use std::path::PathBuf;

use crate::cli::WarehouseArgs;
use crate::error::{Error, Result};
use crate::models::Period;
use crate::services::fundamentals_sync::{FundamentalsConfig, FundamentalsSync};
use crate::services::shard::Universe;
use crate::services::source_client::SourceClient;

pub struct Options {
    pub warehouse: WarehouseArgs,
    pub tickers: Option<String>,
    pub universe: Option<PathBuf>,
    pub size: usize,
    pub period: String,
    pub out_dir: PathBuf,
    pub token: Option<String>,
    pub fi_base: String,
    pub no_fallback_to_q: bool,
    pub time_budget_sec: u64,
}

pub async fn run(opts: Options) -> Result<()> {
    let warehouse = super::open_warehouse(&opts.warehouse.pg_url, opts.warehouse.max_connections).await?;
    let period = Period::parse(&opts.period)?;

    let mut tickers: Vec<String> = if let Some(list) = &opts.tickers {
        Universe::from_tickers(list.split(',').map(|t| t.trim().to_string()), false)
            .tickers()
            .to_vec()
    } else if let Some(path) = &opts.universe {
        Universe::from_file(path, false).await?.tickers().to_vec()
    } else {
        return Err(Error::Config("Provide --tickers or --universe".to_string()));
    };
    if opts.size > 0 {
        tickers.truncate(opts.size);
    }

    let config = FundamentalsConfig {
        base_url: opts.fi_base.clone(),
        bearer_token: opts.token.clone(),
        out_dir: opts.out_dir.clone(),
        fallback_to_q: !opts.no_fallback_to_q,
    };
    let sync = FundamentalsSync::new(warehouse, SourceClient::new()?, config);

    let summary = super::with_time_budget(opts.time_budget_sec, sync.run(&tickers, period)).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
