//! Command-line interface definitions.
//!
//! Flags override values from the optional YAML config file, which in turn
//! override the built-in defaults. The classifier API key is normally taken
//! from the environment.

use crate::config::PipelineConfig;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for ticker_news.
///
/// # Examples
///
/// ```sh
/// # Classify and publish every item on a saved page
/// ticker_news --source ./sahi-buzz.html --companies ./companies.json
///
/// # Items as JSON, faster ticks, keep a run report
/// ticker_news -s items.json --interval-secs 5 --report-dir ./reports
///
/// # Try the classifier on one piece of text
/// ticker_news --classify-text "TCS wins a $2bn deal from a UK insurer"
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Item source: JSON item list or saved HTML page, as a path or http(s) URL
    #[arg(short, long, required_unless_present = "classify_text")]
    pub source: Option<String>,

    /// Company list (JSON array of {nsc, name}) used as the ticker whitelist
    #[arg(long)]
    pub companies: Option<PathBuf>,

    /// Optional path to a YAML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Chat-completions endpoint of the classifier
    #[arg(long)]
    pub classifier_endpoint: Option<String>,

    /// Model name sent to the classifier
    #[arg(long)]
    pub classifier_model: Option<String>,

    /// Bearer token for the classifier
    #[arg(long, env = "CLASSIFIER_API_KEY", hide_env_values = true)]
    pub classifier_api_key: Option<String>,

    /// Content API endpoint that stores published records
    #[arg(long)]
    pub publish_endpoint: Option<String>,

    /// Seconds between processing ticks
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Classifier attempts per item
    #[arg(long)]
    pub max_retries: Option<usize>,

    /// Seconds to wait between classifier attempts
    #[arg(long)]
    pub retry_backoff_secs: Option<u64>,

    /// Write a JSON run report into this directory
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Classify a single piece of text, print the validated result and exit
    #[arg(long)]
    pub classify_text: Option<String>,
}

impl Cli {
    /// Overlay the flags that were given onto `config`.
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(path) = &self.companies {
            config.companies_path = path.clone();
        }
        if let Some(endpoint) = &self.classifier_endpoint {
            config.classifier.endpoint = endpoint.clone();
        }
        if let Some(model) = &self.classifier_model {
            config.classifier.model = model.clone();
        }
        if let Some(key) = &self.classifier_api_key {
            config.classifier.api_key = Some(key.clone());
        }
        if let Some(endpoint) = &self.publish_endpoint {
            config.publisher.endpoint = endpoint.clone();
        }
        if let Some(secs) = self.interval_secs {
            config.scheduler.tick_interval_secs = secs;
        }
        if let Some(attempts) = self.max_retries {
            config.classifier.retry.max_attempts = attempts;
        }
        if let Some(secs) = self.retry_backoff_secs {
            config.classifier.retry.backoff_secs = secs;
        }
    }
}
