//! Validation of classifier replies against the ticker whitelist.
//!
//! Rules are applied in order and the first failing rule decides the
//! rejection reason:
//!
//! 1. The symbol must be present and, upper-cased and trimmed, be in the
//!    whitelist.
//! 2. `company_name`, `headline` and `confidence` must be present and truthy.
//! 3. `confidence` is clamped into `[0, 1]`.
//! 4. `news_date` is normalized to `YYYY-MM-DD`; anything unparseable becomes
//!    today's date.
//!
//! Only rules 1 and 2 can reject. Date problems never block publication.

use crate::models::{ClassificationResult, RawClassification};
use crate::registry::CompanyRegistry;
use crate::utils::today_utc;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::fmt;

/// Why a classifier reply was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    UnknownOrMissingTicker,
    MissingRequiredField,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::UnknownOrMissingTicker => write!(f, "UNKNOWN_OR_MISSING_TICKER"),
            RejectReason::MissingRequiredField => write!(f, "MISSING_REQUIRED_FIELD"),
        }
    }
}

/// Validate `raw` against `whitelist`, defaulting bad dates to today (UTC).
pub fn validate(
    raw: &RawClassification,
    whitelist: &CompanyRegistry,
) -> Result<ClassificationResult, RejectReason> {
    validate_on(raw, whitelist, today_utc())
}

/// Same as [`validate`], with the fallback date supplied by the caller.
pub fn validate_on(
    raw: &RawClassification,
    whitelist: &CompanyRegistry,
    today: NaiveDate,
) -> Result<ClassificationResult, RejectReason> {
    let ticker = raw
        .symbol()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| whitelist.contains(s))
        .ok_or(RejectReason::UnknownOrMissingTicker)?;

    let company_name = truthy(raw.company_name.as_deref()).ok_or(RejectReason::MissingRequiredField)?;
    let headline = truthy(raw.headline.as_deref()).ok_or(RejectReason::MissingRequiredField)?;
    // Zero and NaN count as missing, whether sent as a number or a string.
    let confidence = raw
        .confidence
        .filter(|c| *c != 0.0 && !c.is_nan())
        .ok_or(RejectReason::MissingRequiredField)?;

    let news_date = raw
        .news_date
        .as_deref()
        .and_then(parse_news_date)
        .unwrap_or(today);

    Ok(ClassificationResult {
        company_name: company_name.to_string(),
        headline: headline.to_string(),
        description: raw.description.clone().unwrap_or_default(),
        ticker,
        confidence: confidence.clamp(0.0, 1.0),
        news_date: news_date.format("%Y-%m-%d").to_string(),
    })
}

fn truthy(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

/// Parse the date formats models actually emit.
pub fn parse_news_date(input: &str) -> Option<NaiveDate> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc().date());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    ["%Y-%m-%d", "%Y/%m/%d", "%d %B %Y", "%d %b %Y", "%B %d, %Y", "%b %d, %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}
