//! Minimal RSS item extraction. The relay serves well-formed feed XML from a
//! fixed upstream, so a regex scan over `<item>` blocks is sufficient; no
//! XML dependency needed.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

static RE_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<item>(.*?)</item>").unwrap());
static RE_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static RE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<link[^>]*>(.*?)</link>").unwrap());
static RE_PUBDATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<pubDate[^>]*>(.*?)</pubDate>").unwrap());
static RE_CDATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^<!\[CDATA\[(.*)\]\]>$").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct RssItem {
    pub url: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
}

fn clean(fragment: &str) -> String {
    let trimmed = fragment.trim();
    match RE_CDATA.captures(trimmed) {
        Some(cap) => cap[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}

/// Parse feed XML into items. Items without a link are dropped; a missing
/// title falls back to the URL.
pub fn parse_rss(xml: &str) -> Vec<RssItem> {
    let mut out = Vec::new();
    for item in RE_ITEM.captures_iter(xml) {
        let block = &item[1];
        let url = RE_LINK
            .captures(block)
            .map(|c| clean(&c[1]))
            .unwrap_or_default();
        if url.is_empty() {
            continue;
        }
        let title = RE_TITLE
            .captures(block)
            .map(|c| clean(&c[1]))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| url.clone());
        let published_at = RE_PUBDATE
            .captures(block)
            .and_then(|c| DateTime::parse_from_rfc2822(clean(&c[1]).as_str()).ok())
            .map(|dt| dt.with_timezone(&Utc));
        out.push(RssItem { url, title, published_at });
    }
    out
}

/// Canonicalize a discovered URL: trim and force https on the known host.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if let Some(rest) = url.strip_prefix("http://vietstock.vn/") {
        return format!("https://vietstock.vn/{}", rest);
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_items_with_cdata_and_pubdate() {
        let xml = r#"<rss><channel>
            <item>
              <title><![CDATA[Cổ phiếu FPT tăng]]></title>
              <link>https://vietstock.vn/2026/02/abc.htm</link>
              <pubDate>Mon, 16 Feb 2026 08:30:00 +0700</pubDate>
            </item>
            <item>
              <link>http://vietstock.vn/2026/02/no-title.htm</link>
            </item>
            <item><title>no link</title></item>
        </channel></rss>"#;

        let items = parse_rss(xml);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Cổ phiếu FPT tăng");
        assert_eq!(items[0].url, "https://vietstock.vn/2026/02/abc.htm");
        let pub_at = items[0].published_at.unwrap();
        assert_eq!(pub_at.timestamp(), 1771205400);
        assert_eq!(items[1].title, items[1].url);
        assert!(items[1].published_at.is_none());
    }

    #[test]
    fn url_normalization() {
        assert_eq!(
            normalize_url(" http://vietstock.vn/2026/01/x.htm "),
            "https://vietstock.vn/2026/01/x.htm"
        );
        assert_eq!(normalize_url("https://fili.vn/a.htm"), "https://fili.vn/a.htm");
    }
}
