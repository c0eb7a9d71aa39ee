//! Platform-wide constants: timeframe grids, universe filters, and the
//! static pieces of the trading calendar.

/// Milliseconds per timeframe bar.
pub const MS_15M: i64 = 15 * 60 * 1000;
pub const MS_1H: i64 = 60 * 60 * 1000;
pub const MS_1D: i64 = 24 * 60 * 60 * 1000;

/// Broad market indices appended to the universe when `--include-indices`
/// is set. The candle source expects the full INDEX-suffixed names.
pub const INDEX_TICKERS: &[&str] = &["VNINDEX", "HNXINDEX", "UPCOMINDEX"];

/// Tickers accepted into the universe. Anything failing this is dropped at
/// load time so a malformed symbols row cannot poison a shard.
pub const UNIVERSE_TICKER_RE: &str = r"^[A-Z0-9._-]{2,10}$";

/// Ticker shape accepted by the HTTP API.
pub const API_TICKER_RE: &str = r"^[A-Z0-9._-]{1,10}$";

/// Tokens the symbol linker must never emit as tickers.
pub const LINKER_STOPWORDS: &[&str] = &[
    "ETF", "USD", "VND", "VNINDEX", "HNX", "HOSE", "UPCOM", "CTCP", "VNI",
];

/// Single pinned browser-like UA for news fetching. The upstream blocks
/// default library user-agents.
pub const BROWSER_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Fixed-date Vietnam exchange holidays (month, day). Lunar-calendar
/// holidays (Tet, Hung Kings) shift yearly and are carried per-year below.
pub const VN_FIXED_HOLIDAYS: &[(u32, u32)] = &[
    (1, 1),  // New Year
    (4, 30), // Reunification Day
    (5, 1),  // Labour Day
    (9, 2),  // National Day
];

/// Observed market-closure dates that do not fall on the fixed list,
/// as (year, month, day). Covers the Tet and Hung Kings closures for the
/// years the backfill window reaches. Extend when a new year is announced.
pub const VN_EXTRA_HOLIDAYS: &[(i32, u32, u32)] = &[
    (2024, 2, 8),
    (2024, 2, 9),
    (2024, 2, 12),
    (2024, 2, 13),
    (2024, 2, 14),
    (2024, 4, 18),
    (2024, 9, 3),
    (2025, 1, 27),
    (2025, 1, 28),
    (2025, 1, 29),
    (2025, 1, 30),
    (2025, 1, 31),
    (2025, 4, 7),
    (2025, 5, 2),
    (2026, 2, 16),
    (2026, 2, 17),
    (2026, 2, 18),
    (2026, 2, 19),
    (2026, 2, 20),
];

/// Query-service paging bounds.
pub const MAX_QUERY_LIMIT: i64 = 2000;
pub const DEFAULT_QUERY_LIMIT: i64 = 500;

/// Article body shorter than this (words) triggers the render-relay retry.
pub const MIN_ARTICLE_WORDS: usize = 80;

/// Snippet length (chars) for news list endpoints.
pub const NEWS_SNIPPET_CHARS: usize = 220;

/// Discovery stops paging a seed after this many consecutive pages with no
/// new URLs.
pub const NO_NEW_PAGES_STOP: u32 = 3;

/// Error strings persisted to the warehouse are truncated to this length.
pub const MAX_STORED_ERROR_LEN: usize = 800;

/// Metrics accepted by fundamentals normalization.
pub const FI_METRIC_RE: &str = r"^(is|bs|cf|r|ratio)\d+$";
