use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Current time as unix milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse timestamp from string, supporting the formats seen across sources:
/// - RFC3339: "2025-01-15T10:30:00Z"
/// - ISO 8601: "2025-01-15T10:30:00"
/// - Legacy space format: "2025-01-15 10:30:00"
/// - Date only: "2025-01-15"
pub fn parse_timestamp(time_str: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(time_str) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(time_str, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt.and_utc());
    }

    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(time_str, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc());
    }

    if let Ok(d) = chrono::NaiveDate::parse_from_str(time_str, "%Y-%m-%d") {
        return Ok(d.and_hms_opt(0, 0, 0).unwrap().and_utc());
    }

    Err(Error::Parse(format!("Unrecognized timestamp: {}", time_str)))
}

/// Format unix ms as a YYYY-MM-DD date string (UTC).
pub fn ms_to_date(ts_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string())
}

/// Canonical JSON: object keys sorted recursively, arrays in order, scalars
/// per serde_json. Equal canonical strings imply equal block hashes.
pub fn stable_stringify(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                out.push('{');
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for (i, k) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::to_string(k).expect("string serializes"));
                    out.push(':');
                    write(&map[*k], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            scalar => {
                out.push_str(&serde_json::to_string(scalar).expect("scalar serializes"));
            }
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

/// SHA-256 of the canonical form, hex-encoded. Used to detect block changes.
pub fn block_hash(value: &Value) -> String {
    sha256_hex(stable_stringify(value).as_bytes())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Write-temp + atomic rename. All on-disk state (cursors, raw blocks,
/// state.json) goes through here; readers never observe a torn file.
pub async fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

pub async fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &body).await
}

/// Truncate at a char boundary; DB error columns and snippets must never
/// split a multi-byte sequence.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Freshness {
    pub ok: bool,
    pub reason: &'static str,
    pub age_ms: Option<i64>,
}

/// Data-freshness check used by the health surfaces. A timestamp from the
/// future reads as clock skew, not staleness.
pub fn evaluate_freshness(now_ms: i64, last_ms: Option<i64>, max_age_ms: i64) -> Freshness {
    match last_ms {
        None => Freshness { ok: false, reason: "missing_timestamp", age_ms: None },
        Some(last) if now_ms < last => {
            Freshness { ok: true, reason: "clock_skew", age_ms: Some(now_ms - last) }
        }
        Some(last) => {
            let age = now_ms - last;
            if age <= max_age_ms {
                Freshness { ok: true, reason: "fresh", age_ms: Some(age) }
            } else {
                Freshness { ok: false, reason: "stale", age_ms: Some(age) }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stable_stringify_sorts_keys_recursively() {
        let a = json!({"c": {"d": "x"}, "a": 1, "b": [2, 3]});
        let b = json!({"a": 1, "b": [2, 3], "c": {"d": "x"}});
        let s = stable_stringify(&a);
        assert_eq!(s, r#"{"a":1,"b":[2,3],"c":{"d":"x"}}"#);
        assert_eq!(s, stable_stringify(&b));
    }

    #[test]
    fn block_hash_follows_canonical_form() {
        let a = json!({"b": [2, 3], "c": {"d": "x"}, "a": 1});
        let b = json!({"a": 1, "c": {"d": "x"}, "b": [2, 3]});
        assert_eq!(block_hash(&a), block_hash(&b));
        assert_eq!(
            block_hash(&a),
            "188e54048bde2e27d6aab5e2a3848d8e02e8f00e220b94798b5e00a35dbb5cf4"
        );
        assert_ne!(block_hash(&a), block_hash(&json!({"a": 1})));
    }

    #[test]
    fn parse_timestamp_formats() {
        assert!(parse_timestamp("2025-01-15T10:30:00Z").is_ok());
        assert!(parse_timestamp("2025-01-15T10:30:00").is_ok());
        assert!(parse_timestamp("2025-01-15 10:30:00").is_ok());
        assert_eq!(
            parse_timestamp("2025-01-15").unwrap().timestamp(),
            1736899200
        );
        assert!(parse_timestamp("15/01/2025").is_err());
    }

    #[test]
    fn truncate_chars_is_boundary_safe() {
        let s = "cổ phiếu tăng mạnh";
        let t = truncate_chars(s, 8);
        assert_eq!(t.chars().count(), 8);
        assert!(s.starts_with(&t));
    }

    #[test]
    fn freshness_boundaries() {
        let f = evaluate_freshness(1000, None, 100);
        assert!(!f.ok);
        assert_eq!(f.reason, "missing_timestamp");

        let f = evaluate_freshness(1000, Some(2000), 100);
        assert!(f.ok);
        assert_eq!(f.reason, "clock_skew");

        let f = evaluate_freshness(1000, Some(950), 100);
        assert!(f.ok);
        assert_eq!(f.reason, "fresh");

        let f = evaluate_freshness(1000, Some(800), 100);
        assert!(!f.ok);
        assert_eq!(f.reason, "stale");
    }

    #[tokio::test]
    async fn atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        atomic_write(&path, b"one").await.unwrap();
        atomic_write(&path, b"two").await.unwrap();
        let body = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(body, "two");
        assert!(!path.with_extension("tmp").exists());
    }
}
