//! Item extraction from a rendered news-feed page.
//!
//! Each item card matched by [`SourceConfig::item_selector`] yields one item:
//! the headline comes from its first `h3`, the teaser from its first `p`, and
//! the section and time labels from their styled spans when present.

use crate::config::SourceConfig;
use crate::errors::SourceError;
use crate::models::RawItem;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("h3").expect("static selector"));
static DESCRIPTION: Lazy<Selector> = Lazy::new(|| Selector::parse("p").expect("static selector"));
static CATEGORY: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".text-sunrise-800").expect("static selector"));
static TIME: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".text-neutral-tertiary-dark").expect("static selector"));

/// Extract every item card on the page, usable or not.
pub fn extract_items(html: &str, config: &SourceConfig) -> Result<Vec<RawItem>, SourceError> {
    let card = Selector::parse(&config.item_selector).map_err(|e| SourceError::Selector {
        selector: config.item_selector.clone(),
        message: e.to_string(),
    })?;

    let document = Html::parse_document(html);
    let items: Vec<RawItem> = document
        .select(&card)
        .map(|el| RawItem {
            title: first_text(el, &TITLE).unwrap_or_default(),
            description: first_text(el, &DESCRIPTION).unwrap_or_default(),
            source: config.label.clone(),
            date: first_text(el, &TIME).filter(|s| !s.is_empty()),
            category: first_text(el, &CATEGORY).filter(|s| !s.is_empty()),
        })
        .collect();

    debug!(cards = items.len(), "Extracted item cards");
    Ok(items)
}

fn first_text(el: ElementRef<'_>, selector: &Selector) -> Option<String> {
    el.select(selector)
        .next()
        .map(|found| found.text().collect::<String>().trim().to_string())
}
