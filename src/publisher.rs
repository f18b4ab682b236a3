//! Downstream publishing of validated records.
//!
//! One POST per record, no retries. The content API signals acceptance by
//! returning an `id` in its JSON body; anything else is a rejection.

use crate::config::PublisherConfig;
use crate::models::PublishRecord;
use crate::utils::truncate_for_log;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

/// What the content API made of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// Stored; carries the identifier the API assigned.
    Accepted(String),
    /// The API answered but did not store the record.
    Rejected { status: u16, detail: String },
    /// The API could not be reached or its reply could not be read.
    TransportFailure(String),
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishOutcome::Accepted(id) => write!(f, "accepted as {id}"),
            PublishOutcome::Rejected { status, detail } => {
                write!(f, "rejected with HTTP {status}: {detail}")
            }
            PublishOutcome::TransportFailure(e) => write!(f, "transport failure: {e}"),
        }
    }
}

/// Anything that can take a record downstream.
pub trait Publish {
    async fn publish(&self, record: PublishRecord) -> PublishOutcome;
}

/// Wire payload expected by the content API.
#[derive(Debug, Serialize)]
struct PublishPayload<'a> {
    title: &'a str,
    description: &'a str,
    source: &'a str,
    company: &'a str,
    ticker: &'a str,
    confidence: f64,
    news_date: &'a str,
}

impl<'a> From<&'a PublishRecord> for PublishPayload<'a> {
    fn from(record: &'a PublishRecord) -> Self {
        let c = &record.classification;
        Self {
            title: &c.headline,
            description: &c.description,
            source: &record.source,
            company: &c.company_name,
            ticker: &c.ticker,
            confidence: c.confidence,
            news_date: &c.news_date,
        }
    }
}

/// HTTP client for the content API.
#[derive(Debug)]
pub struct ContentPublisher {
    http: reqwest::Client,
    config: PublisherConfig,
}

impl ContentPublisher {
    pub fn new(config: PublisherConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { http, config })
    }
}

impl Publish for ContentPublisher {
    #[instrument(level = "info", skip_all, fields(ticker = %record.classification.ticker))]
    async fn publish(&self, record: PublishRecord) -> PublishOutcome {
        let t0 = Instant::now();
        let payload = PublishPayload::from(&record);

        let response = match self.http.post(&self.config.endpoint).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, timeout = e.is_timeout(), "Publish request failed");
                return PublishOutcome::TransportFailure(e.to_string());
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                error!(status, error = %e, "Failed to read publish response");
                return PublishOutcome::TransportFailure(e.to_string());
            }
        };

        let outcome = interpret_response(status, &body);
        let elapsed_ms = t0.elapsed().as_millis() as u64;
        match &outcome {
            PublishOutcome::Accepted(id) => info!(
                %id,
                company = %record.classification.company_name,
                elapsed_ms,
                "Stored"
            ),
            other => warn!(outcome = %other, elapsed_ms, "Server rejected record"),
        }
        outcome
    }
}

/// Classify an HTTP reply from the content API.
pub fn interpret_response(status: u16, body: &str) -> PublishOutcome {
    let json = serde_json::from_str::<Value>(body).ok();

    if !(200..300).contains(&status) {
        let detail = json
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| truncate_for_log(body, 300));
        return PublishOutcome::Rejected { status, detail };
    }

    match json.as_ref().and_then(|v| v.get("id")).and_then(truthy_id) {
        Some(id) => PublishOutcome::Accepted(id),
        None => PublishOutcome::Rejected {
            status,
            detail: truncate_for_log(body, 300),
        },
    }
}

fn truthy_id(id: &Value) -> Option<String> {
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64().is_some_and(|f| f != 0.0) => Some(n.to_string()),
        _ => None,
    }
}
