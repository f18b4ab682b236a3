//! # ticker_news
//!
//! Classifies market news items against a whitelist of company tickers with
//! an LLM and publishes the validated records to a content API.
//!
//! ## Usage
//!
//! ```sh
//! CLASSIFIER_API_KEY=... ticker_news --source ./sahi-buzz.html --companies ./companies.json
//! ```
//!
//! ## Architecture
//!
//! The application is a single-flight pipeline:
//! 1. **Loading**: read the company whitelist (fail-open) and the scraped items
//! 2. **Queueing**: enqueue every usable item in page order
//! 3. **Processing**: on each timer tick, take one item through
//!    classifier → validator → publisher; ticks that find an item in flight
//!    do nothing
//! 4. **Shutdown**: once the queue drains (or on Ctrl-C) stop the timers,
//!    log the run summary and optionally write it to disk
//!
//! Exit status is non-zero only when startup fails or the run is interrupted.

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod errors;
mod models;
mod processor;
mod publisher;
mod registry;
mod report;
mod shutdown;
mod source;
mod utils;
mod validator;

use api::{ChatCompletionsAsk, ClassifierClient};
use cli::Cli;
use config::PipelineConfig;
use processor::Processor;
use publisher::ContentPublisher;
use registry::CompanyRegistry;
use shutdown::Shutdown;
use source::SourceLocation;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339());
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "ticker_news starting up");
    debug!(?args.source, ?args.config, "Parsed CLI arguments");

    // ---- Configuration ----
    let mut config = PipelineConfig::load(args.config.as_deref()).await?;
    args.apply(&mut config);
    if config.classifier.api_key.is_none() {
        warn!("No classifier API key configured; requests will be sent unauthenticated");
    }

    let shutdown = Shutdown::new();
    let whitelist = Arc::new(CompanyRegistry::load(&config.companies_path).await);
    let classifier = ClassifierClient::new(
        ChatCompletionsAsk::new(config.classifier.clone())?,
        &config.classifier,
        shutdown.clone(),
    );

    if let Some(text) = &args.classify_text {
        return match classifier.classify(text, &whitelist).await {
            Some(result) => {
                println!("{}", serde_json::to_string_pretty(&result)?);
                Ok(())
            }
            None => Err("no valid classification for the given text".into()),
        };
    }

    // ---- Items ----
    let Some(location) = args.source.as_deref().map(SourceLocation::parse) else {
        return Err("an item source is required".into());
    };
    let items = match source::load_items(&location, &config.source).await {
        Ok(items) => items,
        Err(e) => {
            error!(%location, error = %e, "Failed to load item source");
            return Err(e.into());
        }
    };

    let publisher = ContentPublisher::new(config.publisher.clone())?;
    let processor = Processor::new(
        classifier,
        publisher,
        whitelist,
        config.scheduler.clone(),
        shutdown.clone(),
    );
    processor.enqueue_all(items);

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl-C");
            signal.trigger();
        }
    });

    let summary = processor.run().await;

    if let Some(dir) = &args.report_dir {
        if let Err(e) = report::write_summary(&summary, dir, Utc::now()).await {
            error!(error = %e, "Failed to write run report");
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        state = ?processor.state(),
        published = summary.stats.published,
        dropped = summary.stats.dropped(),
        "Execution complete"
    );

    if summary.interrupted {
        return Err(format!("interrupted with {} items still queued", summary.remaining).into());
    }
    Ok(())
}
