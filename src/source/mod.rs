//! Acquisition of the items to classify.
//!
//! The browser-driven scrape happens elsewhere. This module reads what it
//! leaves behind, from a local path or an http(s) URL:
//!
//! | Body | Handling |
//! |------|----------|
//! | JSON array | Deserialized directly into [`RawItem`]s |
//! | HTML page | Item cards extracted by [`html::extract_items`] |
//!
//! Items without a title or description are dropped here, before anything is
//! enqueued. Failing to read the source is the one error that aborts a run.

pub mod html;

use crate::config::SourceConfig;
use crate::errors::SourceError;
use crate::models::RawItem;
use std::fmt;
use std::path::PathBuf;
use tracing::{info, instrument, warn};
use url::Url;

/// Where the items come from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceLocation {
    File(PathBuf),
    Url(Url),
}

impl SourceLocation {
    /// Treat http(s) URLs as remote, anything else as a local path.
    pub fn parse(location: &str) -> Self {
        match Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => SourceLocation::Url(url),
            _ => SourceLocation::File(PathBuf::from(location)),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::File(path) => write!(f, "{}", path.display()),
            SourceLocation::Url(url) => write!(f, "{url}"),
        }
    }
}

/// Read the source and return its usable items in page order.
#[instrument(level = "info", skip_all, fields(%location))]
pub async fn load_items(
    location: &SourceLocation,
    config: &SourceConfig,
) -> Result<Vec<RawItem>, SourceError> {
    let body = match location {
        SourceLocation::File(path) => {
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| SourceError::Io {
                    path: path.clone(),
                    source,
                })?
        }
        SourceLocation::Url(url) => fetch(url, config).await?,
    };

    let items = parse_items(&body, config)?;
    if items.is_empty() {
        warn!("Item source contained no usable items");
    } else {
        info!(count = items.len(), "Loaded items");
    }
    Ok(items)
}

async fn fetch(url: &Url, config: &SourceConfig) -> Result<String, SourceError> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.fetch_timeout_secs))
        .build()?;
    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status(status.as_u16()));
    }
    Ok(response.text().await?)
}

/// Decode a source body, JSON or HTML, into usable items.
pub fn parse_items(body: &str, config: &SourceConfig) -> Result<Vec<RawItem>, SourceError> {
    let items = if body.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<RawItem>>(body)?
    } else {
        html::extract_items(body, config)?
    };

    let total = items.len();
    let usable: Vec<RawItem> = items
        .into_iter()
        .filter(RawItem::is_usable)
        .map(|mut item| {
            if item.source.trim().is_empty() {
                item.source = config.label.clone();
            }
            item
        })
        .collect();

    if usable.len() < total {
        warn!(
            dropped = total - usable.len(),
            "Dropped items without title or description"
        );
    }
    Ok(usable)
}
