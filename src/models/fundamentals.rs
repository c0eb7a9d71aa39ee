use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    Q,
    Y,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Q => "Q",
            Period::Y => "Y",
        }
    }

    pub fn parse(s: &str) -> Result<Period> {
        match s.trim().to_uppercase().as_str() {
            "Q" => Ok(Period::Q),
            "Y" => Ok(Period::Y),
            other => Err(Error::Validation(format!("Period must be Q or Y, got {}", other))),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Financial statement family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statement {
    Is,
    Bs,
    Cf,
    Ratio,
    Kpi,
}

impl Statement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statement::Is => "is",
            Statement::Bs => "bs",
            Statement::Cf => "cf",
            Statement::Ratio => "ratio",
            Statement::Kpi => "kpi",
        }
    }

    pub fn parse(s: &str) -> Result<Statement> {
        match s.trim().to_lowercase().as_str() {
            "is" => Ok(Statement::Is),
            "bs" => Ok(Statement::Bs),
            "cf" => Ok(Statement::Cf),
            "ratio" => Ok(Statement::Ratio),
            "kpi" => Ok(Statement::Kpi),
            other => Err(Error::Validation(format!("Unknown statement: {}", other))),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One normalized fundamental point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiPoint {
    pub ticker: String,
    pub period: Period,
    pub statement: Statement,
    pub period_date: Option<chrono::NaiveDate>,
    pub period_date_name: Option<String>,
    pub metric: String,
    pub value: Option<f64>,
    pub fetched_at: String,
}

/// Normalize a provider period date into an ISO date. Observed shapes:
/// YYYY-MM-DD, YYYY-MM, YYYY.
pub fn normalize_period_date(raw: &str) -> Option<chrono::NaiveDate> {
    let s = raw.trim();
    let padded = if s.len() == 7 && s.as_bytes().get(4) == Some(&b'-') {
        format!("{}-01", s)
    } else if s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()) {
        format!("{}-01-01", s)
    } else {
        s.to_string()
    };
    chrono::NaiveDate::parse_from_str(&padded, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_and_statement_parse() {
        assert_eq!(Period::parse(" q ").unwrap(), Period::Q);
        assert!(Period::parse("M").is_err());
        assert_eq!(Statement::parse("IS").unwrap(), Statement::Is);
        assert!(Statement::parse("income").is_err());
    }

    #[test]
    fn period_date_shapes() {
        assert_eq!(
            normalize_period_date("2025-12"),
            chrono::NaiveDate::from_ymd_opt(2025, 12, 1)
        );
        assert_eq!(
            normalize_period_date("2025"),
            chrono::NaiveDate::from_ymd_opt(2025, 1, 1)
        );
        assert_eq!(
            normalize_period_date("2025-06-30"),
            chrono::NaiveDate::from_ymd_opt(2025, 6, 30)
        );
        assert_eq!(normalize_period_date("Q4/2025"), None);
    }
}
