use serde::{Deserialize, Serialize};

/// Listed symbol. Created on first sighting from any source; `ticker` is the
/// stable key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub ticker: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub active: Option<bool>,
    pub updated_at: Option<i64>,
}

/// Map a provider listing status onto `active`.
pub fn status_to_active(status: Option<&str>) -> Option<bool> {
    let s = status?.trim().to_lowercase();
    match s.as_str() {
        "listed" | "trading" | "active" => Some(true),
        "delisted" | "inactive" | "suspended" | "halted" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(status_to_active(Some("Listed")), Some(true));
        assert_eq!(status_to_active(Some("DELISTED")), Some(false));
        assert_eq!(status_to_active(Some("unknown")), None);
        assert_eq!(status_to_active(None), None);
    }
}
