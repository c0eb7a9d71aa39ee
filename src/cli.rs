use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::commands;
use crate::error::Error;

#[derive(Parser)]
#[command(name = "vietmarket")]
#[command(about = "Vietnam-market data platform workers and history API", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Warehouse connection, shared by every subcommand. Flags beat env.
#[derive(Args, Debug, Clone)]
pub struct WarehouseArgs {
    /// Warehouse DSN (postgres://...)
    #[arg(long, env = "PG_URL")]
    pub pg_url: String,

    /// Connection pool size
    #[arg(long, default_value_t = 4)]
    pub max_connections: u32,
}

/// Lease + shard identity, shared by the sharded workers.
#[derive(Args, Debug, Clone)]
pub struct ShardArgs {
    #[arg(long, env = "JOB_NAME", default_value = "vn_candles")]
    pub job_name: String,

    #[arg(long, env = "NODE_ID", default_value = "local")]
    pub node_id: String,

    #[arg(long, env = "SHARD_COUNT", default_value_t = 1)]
    pub shard_count: u32,

    #[arg(long, env = "SHARD_INDEX", default_value_t = 0)]
    pub shard_index: u32,

    #[arg(long, env = "STALE_MINUTES", default_value_t = 30)]
    pub stale_minutes: i64,

    #[arg(long, env = "LEASE_MS", default_value_t = 300_000)]
    pub lease_ms: i64,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest OHLCV candles for this node's shard
    Candles {
        #[command(flatten)]
        warehouse: WarehouseArgs,

        #[command(flatten)]
        shard: ShardArgs,

        /// Comma-separated tickers; overrides the universe
        #[arg(long)]
        tickers: Option<String>,

        /// Universe JSON file ({"tickers": [...]})
        #[arg(long, env = "UNIVERSE_FILE")]
        universe: Option<PathBuf>,

        /// SQL filter over the symbols table (e.g. "active = true")
        #[arg(long)]
        universe_filter: Option<String>,

        /// Timeframes to cover
        #[arg(long, default_value = "1d,1h,15m")]
        tfs: String,

        /// Tickers per run
        #[arg(long, default_value_t = 20)]
        batch_size: usize,

        /// Backfill floors (YYYY-MM-DD)
        #[arg(long, default_value = "2000-01-01")]
        start_1d: String,
        #[arg(long, default_value = "2023-01-01")]
        start_1h: String,
        #[arg(long, default_value = "2024-01-01")]
        start_15m: String,

        /// Bars per source page
        #[arg(long, default_value_t = 1000)]
        chunk: u32,

        /// Append broad market indices to the universe
        #[arg(long, default_value_t = false)]
        include_indices: bool,

        /// Hard wall-clock ceiling per run (exit 124 past it)
        #[arg(long, default_value_t = 1500)]
        run_timeout_sec: u64,

        /// Sleep between source pages (ms)
        #[arg(long, default_value_t = 150)]
        sleep_ms: u64,

        #[arg(long, env = "CURSOR_DIR", default_value = "cursors")]
        cursor_dir: PathBuf,

        /// Candle source base URL override
        #[arg(long, env = "CANDLE_SOURCE_URL")]
        source_base: Option<String>,

        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Scan candles for missing bars and enqueue repairs
    GapScan {
        #[command(flatten)]
        warehouse: WarehouseArgs,

        #[arg(long, default_value = "1d")]
        tf: String,

        #[arg(long, default_value_t = 30)]
        lookback_days: i64,

        #[arg(long, default_value_t = 200)]
        limit_tickers: i64,
    },

    /// Drain the candle repair queue
    Repair {
        #[command(flatten)]
        warehouse: WarehouseArgs,

        #[arg(long, default_value_t = 5)]
        limit: i64,

        #[arg(long, default_value_t = 200)]
        sleep_ms: u64,

        #[arg(long, env = "CANDLE_SOURCE_URL")]
        source_base: Option<String>,
    },

    /// Discover news articles (RSS + listing backfill)
    NewsDiscover {
        #[command(flatten)]
        warehouse: WarehouseArgs,

        /// RSS-cache relay base URL
        #[arg(long, env = "NEWS_RELAY_URL")]
        relay_base: Option<String>,

        #[arg(long, default_value = "https://vietstock.vn/StartPage/ChannelContentPage")]
        listing_base: String,

        #[arg(long, default_value_t = 500)]
        rss_limit: usize,

        #[arg(long, default_value_t = 200)]
        budget_pages: u32,

        /// Requests per second
        #[arg(long, default_value_t = 1.0)]
        rate: f64,
    },

    /// Fetch pending articles and link tickers
    NewsFetch {
        #[command(flatten)]
        warehouse: WarehouseArgs,

        #[arg(long, default_value_t = 30)]
        limit: i64,

        #[arg(long, default_value_t = 1.0)]
        rate: f64,

        /// Headless-render relay base URL
        #[arg(long, env = "NEWS_RENDER_URL")]
        render_base: Option<String>,
    },

    /// Pull financial-statement blocks and normalize them
    Fundamentals {
        #[command(flatten)]
        warehouse: WarehouseArgs,

        /// Comma-separated tickers (e.g. VCB,FPT)
        #[arg(long)]
        tickers: Option<String>,

        /// Universe JSON file when --tickers is absent
        #[arg(long, env = "UNIVERSE_FILE")]
        universe: Option<PathBuf>,

        /// Limit tickers per run
        #[arg(long, default_value_t = 0)]
        size: usize,

        #[arg(long, default_value = "Q")]
        period: String,

        #[arg(long, env = "FI_OUT_DIR", default_value = "data/fi")]
        out_dir: PathBuf,

        /// Provider bearer token (yearly statements need it)
        #[arg(long, env = "FI_TOKEN")]
        token: Option<String>,

        #[arg(long, env = "FI_BASE_URL", default_value = "https://api.simplize.vn/api/company/fi")]
        fi_base: String,

        /// Fail instead of degrading Y -> Q without a token
        #[arg(long, default_value_t = false)]
        no_fallback_to_q: bool,

        /// Hard wall-clock ceiling (exit 124 past it)
        #[arg(long, default_value_t = 1200)]
        time_budget_sec: u64,
    },

    /// Ingest the corporate-actions calendar
    Events {
        #[command(flatten)]
        warehouse: WarehouseArgs,

        #[arg(long, default_value = "https://finance.vietstock.vn/lich-su-kien.htm")]
        base_url: String,

        #[arg(long, default_value_t = 5)]
        max_pages: u32,
    },

    /// Sync the listed-symbol universe
    SymbolsSync {
        #[command(flatten)]
        warehouse: WarehouseArgs,

        #[arg(long, env = "SYMBOLS_URL")]
        base_url: Option<String>,

        #[arg(long, default_value = "HOSE,HNX,UPCOM")]
        floors: String,

        #[arg(long, default_value_t = 500)]
        page_size: u32,

        #[arg(long, default_value_t = 200)]
        max_pages: u32,
    },

    /// Rebuild derived summary tables
    DerivedSync {
        #[command(flatten)]
        warehouse: WarehouseArgs,

        #[arg(long, default_value_t = 30)]
        context_window_days: i64,
    },

    /// Start the history API
    Serve {
        #[command(flatten)]
        warehouse: WarehouseArgs,

        #[arg(long, default_value_t = 8088)]
        port: u16,

        #[arg(long, env = "HISTORY_API_KEY")]
        api_key: String,
    },

    /// Print a one-shot pipeline status report
    Status {
        #[command(flatten)]
        warehouse: WarehouseArgs,
    },
}

/// Dispatch and map errors onto process exit codes: 0 success (including
/// lease-denied skips), 124 time budget, 1 anything else.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    let result = commands::dispatch(cli.command).await;

    match result {
        Ok(()) => 0,
        Err(Error::Timeout) => {
            eprintln!("{{\"ok\":false,\"error\":\"time_budget_exceeded\"}}");
            124
        }
        Err(Error::CoordinationUnavailable(msg)) => {
            // No data was written; a skip, not a failure, for the scheduler.
            println!(
                "{}",
                serde_json::json!({ "ok": true, "skipped": "lease_error", "detail": msg })
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}
