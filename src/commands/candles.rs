use std::path::PathBuf;

use crate::cli::{ShardArgs, WarehouseArgs};
use crate::error::Result;
use crate::models::Tf;
use crate::services::candle_source::CandleSource;
use crate::services::candle_sync::{CandleSync, CandleSyncConfig};
use crate::services::shard::Universe;
use crate::services::source_client::SourceClient;
use crate::utils::parse_timestamp;

pub struct Options {
    pub warehouse: WarehouseArgs,
    pub shard: ShardArgs,
    pub tickers: Option<String>,
    pub universe: Option<PathBuf>,
    pub universe_filter: Option<String>,
    pub tfs: String,
    pub batch_size: usize,
    pub start_1d: String,
    pub start_1h: String,
    pub start_15m: String,
    pub chunk: u32,
    pub include_indices: bool,
    pub run_timeout_sec: u64,
    pub sleep_ms: u64,
    pub cursor_dir: PathBuf,
    pub source_base: Option<String>,
    pub dry_run: bool,
}

pub async fn run(opts: Options) -> Result<()> {
    let warehouse = super::open_warehouse(&opts.warehouse.pg_url, opts.warehouse.max_connections).await?;

    // Universe: explicit tickers > file > symbols table.
    let universe = if let Some(list) = &opts.tickers {
        Universe::from_tickers(
            list.split(',').map(|t| t.trim().to_string()),
            opts.include_indices,
        )
    } else if let Some(path) = &opts.universe {
        Universe::from_file(path, opts.include_indices).await?
    } else {
        Universe::from_warehouse(&warehouse, opts.universe_filter.as_deref(), opts.include_indices)
            .await?
    };

    let config = CandleSyncConfig {
        job_name: opts.shard.job_name.clone(),
        node_id: opts.shard.node_id.clone(),
        shard_count: opts.shard.shard_count,
        shard_index: opts.shard.shard_index,
        batch_size: opts.batch_size,
        tfs: Tf::parse_list(&opts.tfs)?,
        start_1d: parse_timestamp(&opts.start_1d)?.timestamp_millis(),
        start_1h: parse_timestamp(&opts.start_1h)?.timestamp_millis(),
        start_15m: parse_timestamp(&opts.start_15m)?.timestamp_millis(),
        chunk: opts.chunk,
        include_indices: opts.include_indices,
        run_timeout_sec: opts.run_timeout_sec,
        stale_minutes: opts.shard.stale_minutes,
        lease_ms: opts.shard.lease_ms,
        sleep_ms: opts.sleep_ms,
        cursor_dir: opts.cursor_dir.clone(),
        dry_run: opts.dry_run,
    };

    let source = CandleSource::new(SourceClient::new()?, opts.source_base.clone(), "vci");
    let sync = CandleSync::new(warehouse, source, config);

    let summary = super::with_time_budget(opts.run_timeout_sec, sync.run(&universe)).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
