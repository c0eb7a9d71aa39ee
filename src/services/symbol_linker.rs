//! Deterministic ticker extraction from Vietnamese market news text.
//!
//! Matching runs over the uppercased input; each pattern carries a fixed
//! confidence and the highest-confidence hit wins per ticker. Output order
//! is (confidence desc, ticker asc) so links are reproducible run to run.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::constants::LINKER_STOPWORDS;
use crate::models::SymbolLink;

const CONF_PAREN: f64 = 0.95;
const CONF_EXCHANGE: f64 = 0.92;
const CONF_KEYWORD: f64 = 0.90;
const CONF_TOKEN: f64 = 0.60;

static RE_PAREN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([A-Z]{2,5})\)").unwrap());
static RE_EXCHANGE_PAREN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2,5})\s*\((?:HOSE|HNX|UPCOM)\)").unwrap());
static RE_EXCHANGE_COLON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:HOSE|HNX|UPCOM)[:\-]\s*([A-Z]{2,5})\b").unwrap());
static RE_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:CỔ PHIẾU|MÃ CHỨNG KHOÁN|MÃ CK|MÃ)\s+([A-Z]{2,5})\b").unwrap()
});
static RE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2,5})\b").unwrap());

static STOPWORDS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| LINKER_STOPWORDS.iter().copied().collect());

fn ticker_ok(ticker: &str, known: Option<&HashSet<String>>) -> bool {
    if STOPWORDS.contains(ticker) {
        return false;
    }
    match known {
        Some(set) => set.contains(ticker),
        None => true,
    }
}

fn link_with_prefix(
    text: &str,
    known: Option<&HashSet<String>>,
    prefix: &str,
) -> Vec<SymbolLink> {
    let upper = text.to_uppercase();
    let mut best: std::collections::HashMap<String, (f64, String)> = Default::default();

    let mut consider = |ticker: &str, confidence: f64, method: &str| {
        if !ticker_ok(ticker, known) {
            return;
        }
        let entry = best.entry(ticker.to_string());
        match entry {
            std::collections::hash_map::Entry::Occupied(mut o) => {
                if confidence > o.get().0 {
                    o.insert((confidence, format!("{}{}", prefix, method)));
                }
            }
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert((confidence, format!("{}{}", prefix, method)));
            }
        }
    };

    for cap in RE_PAREN.captures_iter(&upper) {
        consider(&cap[1], CONF_PAREN, "paren");
    }
    for cap in RE_EXCHANGE_PAREN.captures_iter(&upper) {
        consider(&cap[1], CONF_EXCHANGE, "exchange_paren");
    }
    for cap in RE_EXCHANGE_COLON.captures_iter(&upper) {
        consider(&cap[1], CONF_EXCHANGE, "exchange_colon");
    }
    for cap in RE_KEYWORD.captures_iter(&upper) {
        consider(&cap[1], CONF_KEYWORD, "keyword");
    }
    for cap in RE_TOKEN.captures_iter(&upper) {
        consider(&cap[1], CONF_TOKEN, "token");
    }

    let mut links: Vec<SymbolLink> = best
        .into_iter()
        .map(|(ticker, (confidence, method))| SymbolLink { ticker, confidence, method })
        .collect();
    links.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.ticker.cmp(&b.ticker))
    });
    links
}

pub fn link_symbols_from_title(title: &str, known: Option<&HashSet<String>>) -> Vec<SymbolLink> {
    link_with_prefix(title, known, "title_")
}

pub fn link_symbols_from_body(body: &str, known: Option<&HashSet<String>>) -> Vec<SymbolLink> {
    link_with_prefix(body, known, "body_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(tickers: &[&str]) -> HashSet<String> {
        tickers.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn links_keyword_and_paren_mentions() {
        let k = known(&["FPT", "HPG", "VNM"]);
        let links =
            link_symbols_from_title("Cổ phiếu FPT tăng mạnh, HPG (HPG) bứt tốc", Some(&k));

        let fpt = links.iter().find(|l| l.ticker == "FPT").unwrap();
        assert!(fpt.confidence >= 0.9);
        assert_eq!(fpt.method, "title_keyword");

        let hpg = links.iter().find(|l| l.ticker == "HPG").unwrap();
        assert_eq!(hpg.confidence, 0.95);
        assert_eq!(hpg.method, "title_paren");

        assert!(links.iter().all(|l| l.ticker != "VNM"));
        // ordering: confidence desc
        assert_eq!(links[0].ticker, "HPG");
        assert_eq!(links[1].ticker, "FPT");
    }

    #[test]
    fn exchange_patterns() {
        let links = link_symbols_from_body("VNM (HOSE) và HNX: SHS cùng tăng", None);
        let vnm = links.iter().find(|l| l.ticker == "VNM").unwrap();
        assert_eq!(vnm.confidence, 0.92);
        assert_eq!(vnm.method, "body_exchange_paren");
        let shs = links.iter().find(|l| l.ticker == "SHS").unwrap();
        assert_eq!(shs.confidence, 0.92);
        assert_eq!(shs.method, "body_exchange_colon");
    }

    #[test]
    fn stopwords_and_known_set_filter() {
        let links = link_symbols_from_title("ETF và USD cùng VNINDEX trên HOSE", None);
        assert!(links.is_empty());

        // unknown-set mode lets bare tokens through at low confidence
        let links = link_symbols_from_title("DGC công bố lãi", None);
        let dgc = links.iter().find(|l| l.ticker == "DGC").unwrap();
        assert_eq!(dgc.confidence, 0.60);
        assert_eq!(dgc.method, "title_token");
    }

    #[test]
    fn deterministic_and_deduplicated() {
        let k = known(&["FPT", "AAA", "BBB"]);
        let text = "Mã FPT: AAA (AAA) và BBB, FPT FPT";
        let a = link_symbols_from_title(text, Some(&k));
        let b = link_symbols_from_title(text, Some(&k));
        assert_eq!(a, b);
        let fpt: Vec<_> = a.iter().filter(|l| l.ticker == "FPT").collect();
        assert_eq!(fpt.len(), 1);
        assert_eq!(fpt[0].confidence, 0.90);
        // tie at 0.60.. none here; AAA paren 0.95 first, FPT keyword 0.90, BBB token 0.60
        assert_eq!(
            a.iter().map(|l| l.ticker.as_str()).collect::<Vec<_>>(),
            vec!["AAA", "FPT", "BBB"]
        );
    }
}
