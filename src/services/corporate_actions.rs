//! Corporate-action calendar ingest. The events page renders a plain HTML
//! table; rows are parsed with the same dependency-free scanning used for
//! listing pages, dated dd/mm/yyyy, filtered to plausible equity tickers,
//! and keyed by a stable hash so pages can be re-ingested freely.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::CorporateAction;
use crate::services::news::extract::strip_tags;
use crate::services::source_client::{CallOptions, SourceClient};
use crate::services::warehouse::Warehouse;

static RE_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<table[^>]*id="event-content"[^>]*>(.*?)</table>"#).unwrap());
static RE_TR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").unwrap());
static RE_TD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<td[^>]*>(.*?)</td>").unwrap());
static RE_TH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<th\b").unwrap());
static RE_TICKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z0-9]{3,4}$").unwrap());

pub fn parse_ddmmyyyy(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%d/%m/%Y").ok()
}

/// Cell layout of the events table:
/// ticker | exchange | ex_date | record_date | pay_date | event_type | headline
pub fn parse_event_rows(html: &str, source_url: &str) -> Vec<CorporateAction> {
    let Some(table) = RE_TABLE.captures(html) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for tr in RE_TR.captures_iter(&table[1]) {
        let row_html = &tr[1];
        if RE_TH.is_match(row_html) {
            continue;
        }
        let cells: Vec<String> = RE_TD
            .captures_iter(row_html)
            .map(|td| strip_tags(&td[1]))
            .collect();
        if cells.len() < 7 {
            continue;
        }

        let ticker = cells[0].trim().to_uppercase();
        if !RE_TICKER.is_match(&ticker) {
            continue;
        }
        let exchange = non_empty(&cells[1]);
        let ex_date = parse_ddmmyyyy(&cells[2]);
        let record_date = parse_ddmmyyyy(&cells[3]);
        let pay_date = parse_ddmmyyyy(&cells[4]);
        let event_type = non_empty(&cells[5]);
        let headline = non_empty(&cells[6]);

        let ex_date_raw = non_empty(&cells[2]);
        let id = CorporateAction::stable_id(
            &ticker,
            exchange.as_deref(),
            ex_date_raw.as_deref(),
            event_type.as_deref(),
            headline.as_deref(),
        );

        out.push(CorporateAction {
            id,
            ticker,
            exchange,
            ex_date,
            record_date,
            pay_date,
            event_type,
            headline,
            source: "events".to_string(),
            source_url: Some(source_url.to_string()),
        });
    }
    out
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventsSummary {
    pub ok: bool,
    pub pages: u32,
    pub rows_upserted: usize,
}

pub struct EventsIngest {
    warehouse: Warehouse,
    client: SourceClient,
    base_url: String,
}

impl EventsIngest {
    pub fn new(warehouse: Warehouse, client: SourceClient, base_url: String) -> Self {
        Self { warehouse, client, base_url }
    }

    pub async fn run(&self, max_pages: u32) -> Result<EventsSummary> {
        let mut total = 0usize;
        let mut pages = 0u32;
        for page in 1..=max_pages {
            let url = format!("{}?page={}", self.base_url, page);
            let html = match self.client.get(&url, &CallOptions::default()).await {
                Ok(resp) => resp.text,
                Err(e) => {
                    warn!(page, error = %e, "Events page fetch failed, stopping");
                    break;
                }
            };
            let rows = parse_event_rows(&html, &url);
            pages += 1;
            if rows.is_empty() {
                break;
            }
            for row in &rows {
                self.warehouse.ensure_symbol(&row.ticker).await?;
            }
            total += self.warehouse.upsert_corporate_actions(&rows).await?;
        }

        let summary = EventsSummary { ok: true, pages, rows_upserted: total };
        info!(summary = %serde_json::to_string(&summary).unwrap_or_default(), "Events ingest done");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
    <html><table id="event-content">
      <tr><th>Mã CK</th><th>Sàn</th><th>GDKHQ</th><th>Chốt</th><th>Thanh toán</th><th>Loại</th><th>Nội dung</th></tr>
      <tr><td><a href="#">FPT</a></td><td>HOSE</td><td>15/03/2026</td><td>16/03/2026</td><td>30/03/2026</td>
          <td>Cổ tức tiền mặt</td><td>Trả cổ tức đợt 1</td></tr>
      <tr><td>VNINDEX</td><td></td><td>01/01/2026</td><td></td><td></td><td>x</td><td>y</td></tr>
      <tr><td>short</td></tr>
    </table></html>"##;

    #[test]
    fn parses_event_table() {
        let rows = parse_event_rows(PAGE, "https://example.vn/events?page=1");
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.ticker, "FPT");
        assert_eq!(row.exchange.as_deref(), Some("HOSE"));
        assert_eq!(row.ex_date, NaiveDate::from_ymd_opt(2026, 3, 15));
        assert_eq!(row.pay_date, NaiveDate::from_ymd_opt(2026, 3, 30));
        assert_eq!(row.event_type.as_deref(), Some("Cổ tức tiền mặt"));
    }

    #[test]
    fn stable_ids_repeat_across_parses() {
        let a = parse_event_rows(PAGE, "u");
        let b = parse_event_rows(PAGE, "u");
        assert_eq!(a[0].id, b[0].id);
    }

    #[test]
    fn date_parsing() {
        assert_eq!(parse_ddmmyyyy(" 15/03/2026 "), NaiveDate::from_ymd_opt(2026, 3, 15));
        assert_eq!(parse_ddmmyyyy("2026-03-15"), None);
        assert_eq!(parse_ddmmyyyy(""), None);
    }
}
