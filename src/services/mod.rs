pub mod candle_source;
pub mod candle_sync;
pub mod corporate_actions;
pub mod derived_sync;
pub mod fundamentals_sync;
pub mod gap_detector;
pub mod lease;
pub mod news;
pub mod repair_worker;
pub mod shard;
pub mod source_client;
pub mod symbol_linker;
pub mod symbols_sync;
pub mod warehouse;

pub use warehouse::Warehouse;
