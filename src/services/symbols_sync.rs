//! Listed-universe sync from the symbols provider (paged JSON listing).
//! Builds the full active + delisted universe with exchange and name.

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::{Error, Result};
use crate::models::{status_to_active, Symbol};
use crate::services::source_client::{CallOptions, SourceClient};
use crate::services::warehouse::Warehouse;
use crate::utils::now_ms;

pub const DEFAULT_SYMBOLS_URL: &str = "https://finfo-api.vndirect.com.vn/v4/stocks";
pub const DEFAULT_FLOORS: &str = "HOSE,HNX,UPCOM";

#[derive(Debug, Clone, Serialize)]
pub struct SymbolsSummary {
    pub ok: bool,
    pub pages: u32,
    pub symbols: usize,
    pub upserts: usize,
}

/// Map one provider row; field names vary between listing versions.
pub fn parse_symbol_row(row: &Value, updated_at: i64) -> Option<Symbol> {
    let ticker = row
        .get("code")
        .or_else(|| row.get("ticker"))
        .and_then(Value::as_str)?
        .trim()
        .to_uppercase();
    if ticker.is_empty() {
        return None;
    }
    let name = ["companyName", "name", "shortName"]
        .iter()
        .find_map(|k| row.get(*k).and_then(Value::as_str))
        .map(str::to_string);
    let exchange = row
        .get("floor")
        .or_else(|| row.get("exchange"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let active = status_to_active(
        row.get("status")
            .or_else(|| row.get("active"))
            .and_then(Value::as_str),
    );
    Some(Symbol { ticker, name, exchange, active, updated_at: Some(updated_at) })
}

pub struct SymbolsSync {
    warehouse: Warehouse,
    client: SourceClient,
    base_url: String,
    floors: String,
}

impl SymbolsSync {
    pub fn new(
        warehouse: Warehouse,
        client: SourceClient,
        base_url: Option<String>,
        floors: Option<String>,
    ) -> Self {
        Self {
            warehouse,
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_SYMBOLS_URL.to_string()),
            floors: floors.unwrap_or_else(|| DEFAULT_FLOORS.to_string()),
        }
    }

    pub async fn run(&self, page_size: u32, max_pages: u32) -> Result<SymbolsSummary> {
        let ts = now_ms();
        let mut symbols: Vec<Symbol> = Vec::new();
        let mut pages = 0u32;

        for page in 1..=max_pages {
            let url = format!(
                "{}?q=type:stock~floor:{}&size={}&page={}",
                self.base_url, self.floors, page_size, page
            );
            let resp = self.client.get(&url, &CallOptions::default()).await?;
            let body = resp
                .json
                .ok_or_else(|| Error::Parse("Symbols listing is not JSON".to_string()))?;
            let data = body
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            pages = page;
            if data.is_empty() {
                break;
            }
            let page_len = data.len();
            symbols.extend(data.iter().filter_map(|row| parse_symbol_row(row, ts)));
            if page_len < page_size as usize {
                break;
            }
        }

        if symbols.is_empty() {
            return Err(Error::SourceTransient(
                "Symbols provider returned 0 rows".to_string(),
            ));
        }

        let upserts = self.warehouse.upsert_symbols(&symbols).await?;
        let summary = SymbolsSummary { ok: true, pages, symbols: symbols.len(), upserts };
        info!(summary = %serde_json::to_string(&summary).unwrap_or_default(), "Symbols sync done");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_parsing_handles_field_variants() {
        let row = json!({"code": "fpt ", "companyName": "FPT Corp", "floor": "HOSE", "status": "listed"});
        let s = parse_symbol_row(&row, 42).unwrap();
        assert_eq!(s.ticker, "FPT");
        assert_eq!(s.name.as_deref(), Some("FPT Corp"));
        assert_eq!(s.exchange.as_deref(), Some("HOSE"));
        assert_eq!(s.active, Some(true));
        assert_eq!(s.updated_at, Some(42));

        let row = json!({"ticker": "HPG", "name": "Hoa Phat", "exchange": "HOSE", "status": "Delisted"});
        let s = parse_symbol_row(&row, 1).unwrap();
        assert_eq!(s.active, Some(false));

        assert!(parse_symbol_row(&json!({"name": "no ticker"}), 1).is_none());
    }
}
