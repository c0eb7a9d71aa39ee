pub mod candles;
pub mod derived;
pub mod events;
pub mod fundamentals;
pub mod gap_scan;
pub mod news_discover;
pub mod news_fetch;
pub mod repair;
pub mod serve;
pub mod status;
pub mod symbols;

use std::time::Duration;

use crate::cli::Commands;
use crate::error::{Error, Result};
use crate::services::Warehouse;

/// Open the warehouse and make sure the schema exists. Every worker starts
/// here so a fresh database bootstraps from any entry point.
pub async fn open_warehouse(dsn: &str, max_connections: u32) -> Result<Warehouse> {
    let warehouse = Warehouse::connect(dsn, max_connections).await?;
    warehouse.init_schema().await?;
    Ok(warehouse)
}

/// Hard wall-clock ceiling around a worker future; expiry maps to exit 124.
pub async fn with_time_budget<T>(
    seconds: u64,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(Duration::from_secs(seconds), fut).await {
        Ok(out) => out,
        Err(_) => Err(Error::Timeout),
    }
}

pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Candles {
            warehouse,
            shard,
            tickers,
            universe,
            universe_filter,
            tfs,
            batch_size,
            start_1d,
            start_1h,
            start_15m,
            chunk,
            include_indices,
            run_timeout_sec,
            sleep_ms,
            cursor_dir,
            source_base,
            dry_run,
        } => {
            candles::run(candles::Options {
                warehouse,
                shard,
                tickers,
                universe,
                universe_filter,
                tfs,
                batch_size,
                start_1d,
                start_1h,
                start_15m,
                chunk,
                include_indices,
                run_timeout_sec,
                sleep_ms,
                cursor_dir,
                source_base,
                dry_run,
            })
            .await
        }
        Commands::GapScan { warehouse, tf, lookback_days, limit_tickers } => {
            gap_scan::run(warehouse, tf, lookback_days, limit_tickers).await
        }
        Commands::Repair { warehouse, limit, sleep_ms, source_base } => {
            repair::run(warehouse, limit, sleep_ms, source_base).await
        }
        Commands::NewsDiscover {
            warehouse,
            relay_base,
            listing_base,
            rss_limit,
            budget_pages,
            rate,
        } => {
            news_discover::run(warehouse, relay_base, listing_base, rss_limit, budget_pages, rate)
                .await
        }
        Commands::NewsFetch { warehouse, limit, rate, render_base } => {
            news_fetch::run(warehouse, limit, rate, render_base).await
        }
        Commands::Fundamentals {
            warehouse,
            tickers,
            universe,
            size,
            period,
            out_dir,
            token,
            fi_base,
            no_fallback_to_q,
            time_budget_sec,
        } => {
            fundamentals::run(fundamentals::Options {
                warehouse,
                tickers,
                universe,
                size,
                period,
                out_dir,
                token,
                fi_base,
                no_fallback_to_q,
                time_budget_sec,
            })
            .await
        }
        Commands::Events { warehouse, base_url, max_pages } => {
            events::run(warehouse, base_url, max_pages).await
        }
        Commands::SymbolsSync { warehouse, base_url, floors, page_size, max_pages } => {
            symbols::run(warehouse, base_url, floors, page_size, max_pages).await
        }
        Commands::DerivedSync { warehouse, context_window_days } => {
            derived::run(warehouse, context_window_days).await
        }
        Commands::Serve { warehouse, port, api_key } => {
            serve::run(warehouse, port, api_key).await
        }
        Commands::Status { warehouse } => status::run(warehouse).await,
    }
}
