//! Data models that flow through the pipeline.
//!
//! - [`RawItem`]: a scraped news item, as delivered by the item source
//! - [`RawClassification`]: the classifier's reply before validation
//! - [`ClassificationResult`]: a reply that passed validation
//! - [`PublishRecord`]: a validated result joined with its originating item

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A news item harvested from the source page.
///
/// Items are immutable once enqueued. The item source drops anything that
/// fails [`RawItem::is_usable`] before it reaches the queue.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RawItem {
    /// The item headline as shown on the source page.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    /// The teaser paragraph beneath the headline.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    /// Human-readable label of the outlet the item came from.
    #[serde(default)]
    pub source: String,
    /// Free-form date or time label scraped alongside the item.
    #[serde(default, alias = "time", skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Section label, when the source page shows one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl RawItem {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            source: source.into(),
            date: None,
            category: None,
        }
    }

    /// Both title and description must carry text.
    pub fn is_usable(&self) -> bool {
        !self.title.trim().is_empty() && !self.description.trim().is_empty()
    }

    /// The text handed to the classifier: headline followed by the teaser.
    pub fn classifier_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// The classifier's reply object, exactly as decoded.
///
/// Every field is optional and loosely typed: models sometimes send numbers
/// as strings and vice versa, and both `nsc` and `ticker` are used for the
/// symbol. Validation decides what is usable.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawClassification {
    #[serde(default, deserialize_with = "lenient_string")]
    pub company_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub headline: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ticker: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nsc: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub news_date: Option<String>,
}

impl RawClassification {
    /// The symbol the classifier picked. `ticker` wins over `nsc`.
    pub fn symbol(&self) -> Option<&str> {
        [self.ticker.as_deref(), self.nsc.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
    }

    /// True when the reply names neither a symbol nor a company, which is how
    /// models tend to answer "no company found" inside a JSON object.
    pub fn is_empty_answer(&self) -> bool {
        self.symbol().is_none()
            && self
                .company_name
                .as_deref()
                .is_none_or(|name| name.trim().is_empty())
    }
}

/// A classifier reply that passed validation.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ClassificationResult {
    pub company_name: String,
    pub headline: String,
    pub description: String,
    /// Upper-cased and guaranteed to be in the whitelist.
    pub ticker: String,
    /// Clamped into `[0, 1]`.
    pub confidence: f64,
    /// Always `YYYY-MM-DD`.
    pub news_date: String,
}

/// What the publisher sends downstream: the validated classification plus
/// provenance copied from the originating item.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PublishRecord {
    #[serde(flatten)]
    pub classification: ClassificationResult,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl PublishRecord {
    pub fn new(classification: ClassificationResult, item: &RawItem) -> Self {
        Self {
            classification,
            source: item.source.clone(),
            date: item.date.clone(),
        }
    }
}

/// Missing and `null` both decode to an empty string, which
/// [`RawItem::is_usable`] then rejects.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}
