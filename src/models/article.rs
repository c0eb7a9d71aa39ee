use serde::{Deserialize, Serialize};
use std::fmt;

/// Article fetch lifecycle. `Fetched` rows carry non-empty text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Pending,
    Fetched,
    Failed,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Pending => "pending",
            FetchStatus::Fetched => "fetched",
            FetchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Discovered article metadata, keyed by URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleMeta {
    pub url: String,
    pub source: String,
    pub title: String,
    pub published_at: Option<chrono::DateTime<chrono::Utc>>,
    pub feed_url: Option<String>,
}

/// Result of fetching + extracting a single article.
#[derive(Debug, Clone)]
pub struct FetchedArticle {
    pub url: String,
    pub title: Option<String>,
    pub published_at: Option<chrono::DateTime<chrono::Utc>>,
    pub text: String,
    pub content_sha256: String,
    pub word_count: usize,
    pub lang: Option<String>,
    pub fetch_method: String,
}

/// One row returned by the news endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct NewsRow {
    pub url: String,
    pub title: String,
    pub source: String,
    pub published_at: Option<String>,
    pub snippet: String,
    pub tickers: Vec<String>,
}

/// One article↔ticker link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolLink {
    pub ticker: String,
    pub confidence: f64,
    pub method: String,
}
