use serde::Serialize;

/// Corporate-action calendar row. `id` is a stable hash of the key fields so
/// re-ingesting the same event page is idempotent.
#[derive(Debug, Clone, Serialize)]
pub struct CorporateAction {
    pub id: String,
    pub ticker: String,
    pub exchange: Option<String>,
    pub ex_date: Option<chrono::NaiveDate>,
    pub record_date: Option<chrono::NaiveDate>,
    pub pay_date: Option<chrono::NaiveDate>,
    pub event_type: Option<String>,
    pub headline: Option<String>,
    pub source: String,
    pub source_url: Option<String>,
}

impl CorporateAction {
    /// Stable id from the identifying fields, separator-delimited before
    /// hashing so field boundaries can't collide.
    pub fn stable_id(
        ticker: &str,
        exchange: Option<&str>,
        ex_date: Option<&str>,
        event_type: Option<&str>,
        headline: Option<&str>,
    ) -> String {
        let mut buf = Vec::new();
        for part in [
            Some(ticker),
            exchange,
            ex_date,
            event_type,
            headline,
        ] {
            buf.extend_from_slice(part.unwrap_or("").as_bytes());
            buf.push(0x1f);
        }
        crate::utils::sha256_hex(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_id_distinguishes_field_boundaries() {
        let a = CorporateAction::stable_id("FPT", Some("HOSE"), None, None, None);
        let b = CorporateAction::stable_id("FPT", Some("HOSE"), None, None, None);
        let c = CorporateAction::stable_id("FPTH", Some("OSE"), None, None, None);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
