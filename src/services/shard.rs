//! Deterministic ticker→shard routing and resumable per-shard cursors.
//!
//! `shard_of` must be stable across processes, hosts, and releases: two
//! nodes disagreeing on shard membership would double-ingest tickers.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::info;

use crate::constants::{INDEX_TICKERS, UNIVERSE_TICKER_RE};
use crate::error::{Error, Result};
use crate::services::warehouse::Warehouse;
use crate::utils::atomic_write_json;

/// First 4 bytes of sha1(ticker) as a big-endian u32, mod shard_count.
pub fn shard_of(ticker: &str, shard_count: u32) -> u32 {
    let digest = Sha1::digest(ticker.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head % shard_count.max(1)
}

/// The case-normalized, deduplicated, sorted ticker universe.
#[derive(Debug, Clone)]
pub struct Universe {
    tickers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UniverseFile {
    tickers: Vec<String>,
}

impl Universe {
    pub fn from_tickers(raw: impl IntoIterator<Item = String>, include_indices: bool) -> Self {
        let re = Regex::new(UNIVERSE_TICKER_RE).expect("universe regex compiles");
        let mut tickers: Vec<String> = raw
            .into_iter()
            .map(|t| t.trim().to_uppercase())
            .filter(|t| re.is_match(t))
            .collect();
        if include_indices {
            tickers.extend(INDEX_TICKERS.iter().map(|s| s.to_string()));
        }
        tickers.sort();
        tickers.dedup();
        Self { tickers }
    }

    pub async fn from_file(path: &Path, include_indices: bool) -> Result<Self> {
        let body = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("Cannot read universe file {}: {}", path.display(), e))
        })?;
        let parsed: UniverseFile = serde_json::from_str(&body)
            .map_err(|e| Error::Config(format!("Bad universe file: {}", e)))?;
        Ok(Self::from_tickers(parsed.tickers, include_indices))
    }

    pub async fn from_warehouse(
        warehouse: &Warehouse,
        filter_sql: Option<&str>,
        include_indices: bool,
    ) -> Result<Self> {
        let tickers = warehouse.universe_tickers(filter_sql).await?;
        Ok(Self::from_tickers(tickers, include_indices))
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    /// This shard's slice of the universe, in stable sorted order.
    pub fn shard_tickers(&self, shard_index: u32, shard_count: u32) -> Vec<String> {
        self.tickers
            .iter()
            .filter(|t| shard_of(t, shard_count) == shard_index)
            .cloned()
            .collect()
    }
}

/// Persisted per-(job, shard) position in the shard's ticker list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cursor {
    pub next_index: usize,
    #[serde(default)]
    pub last_batch: Vec<String>,
    #[serde(default)]
    pub batch_size: usize,
    #[serde(default)]
    pub universe_count: usize,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Cursor {
    /// Take `batch_size` tickers starting at `next_index`, wrapping around.
    /// Returns the batch and the advanced index.
    pub fn select_batch(&self, shard_tickers: &[String], batch_size: usize) -> (Vec<String>, usize) {
        if shard_tickers.is_empty() || batch_size == 0 {
            return (Vec::new(), 0);
        }
        let n = shard_tickers.len();
        let start = self.next_index % n;
        let take = batch_size.min(n);
        let batch: Vec<String> = (0..take)
            .map(|i| shard_tickers[(start + i) % n].clone())
            .collect();
        let next = (start + take) % n;
        (batch, next)
    }
}

/// Cursor file `{cursor_dir}/{job}_{shard}.json`, written via temp + rename.
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(cursor_dir: &Path, job: &str, shard_index: u32) -> Self {
        Self {
            path: cursor_dir.join(format!("{}_{}.json", job, shard_index)),
        }
    }

    pub async fn load(&self) -> Result<Cursor> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(body) => Ok(serde_json::from_str(&body)
                .map_err(|e| Error::Parse(format!("Corrupt cursor file: {}", e)))?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Cursor::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, cursor: &Cursor) -> Result<()> {
        atomic_write_json(&self.path, cursor).await?;
        info!(path = %self.path.display(), next_index = cursor.next_index, "Cursor advanced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_of_matches_reference_digests() {
        // sha1("FPT") = 8a194bc0... -> 2316913600
        assert_eq!(shard_of("FPT", 4), 2316913600 % 4);
        // sha1("HPG") = fc788d0f... -> 4235758863
        assert_eq!(shard_of("HPG", 8), 4235758863 % 8);
        // sha1("VNINDEX") = cd075b2b... -> 3439811371
        assert_eq!(shard_of("VNINDEX", 8), 3439811371 % 8);
        // pure and stable across calls
        assert_eq!(shard_of("VCB", 7), shard_of("VCB", 7));
        for n in 1..16 {
            assert!(shard_of("AAA", n) < n);
        }
    }

    #[test]
    fn universe_normalizes_and_filters() {
        let u = Universe::from_tickers(
            vec![
                "fpt".to_string(),
                "FPT".to_string(),
                " vcb ".to_string(),
                "X".to_string(),           // too short
                "WAYTOOLONGNAME".to_string(), // too long
                "bad ticker".to_string(),  // bad chars
            ],
            true,
        );
        let mut expected: Vec<String> = vec!["FPT".to_string(), "VCB".to_string()];
        expected.extend(INDEX_TICKERS.iter().map(|s| s.to_string()));
        expected.sort();
        assert_eq!(u.tickers(), expected.as_slice());
    }

    #[test]
    fn shards_partition_the_universe() {
        let u = Universe::from_tickers(
            (0..50).map(|i| format!("TK{:02}", i)),
            false,
        );
        let n = 4;
        let total: usize = (0..n).map(|i| u.shard_tickers(i, n).len()).sum();
        assert_eq!(total, u.len());
    }

    #[test]
    fn batch_selection_wraps() {
        let tickers: Vec<String> = vec!["A1", "B2", "C3", "D4", "E5"]
            .into_iter()
            .map(String::from)
            .collect();
        let cursor = Cursor { next_index: 3, ..Default::default() };
        let (batch, next) = cursor.select_batch(&tickers, 3);
        assert_eq!(batch, vec!["D4", "E5", "A1"]);
        assert_eq!(next, 1);

        // batch larger than the shard covers each ticker at most once
        let cursor = Cursor { next_index: 0, ..Default::default() };
        let (batch, next) = cursor.select_batch(&tickers, 9);
        assert_eq!(batch.len(), 5);
        assert_eq!(next, 0);
    }

    #[tokio::test]
    async fn cursor_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::new(dir.path(), "vn_candles", 2);

        // missing file -> default
        let cursor = store.load().await.unwrap();
        assert_eq!(cursor.next_index, 0);

        let cursor = Cursor {
            next_index: 17,
            last_batch: vec!["FPT".to_string()],
            batch_size: 10,
            universe_count: 1200,
            updated_at: Some("2026-01-01T00:00:00Z".to_string()),
        };
        store.save(&cursor).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.next_index, 17);
        assert_eq!(loaded.universe_count, 1200);
    }
}
