//! Pipeline configuration.
//!
//! Every component receives its own section of [`PipelineConfig`] through its
//! constructor; nothing reads ambient global state. Defaults reproduce the
//! production settings, an optional YAML file can override them, and CLI flags
//! override the file (see [`crate::cli::Cli::apply`]).

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

pub const DEFAULT_CLASSIFIER_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_CLASSIFIER_MODEL: &str = "deepseek-r1-distill-llama-70b";
pub const DEFAULT_PUBLISH_ENDPOINT: &str = "https://profitbooking.in/wp-json/scraper/v1/sahi_article";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// JSON array of `{nsc, name}` entries forming the ticker whitelist.
    pub companies_path: PathBuf,
    pub source: SourceConfig,
    pub classifier: ClassifierConfig,
    pub publisher: PublisherConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    /// Label stamped on items that do not carry their own `source`.
    pub label: String,
    /// CSS selector matching one item card on a saved source page.
    pub item_selector: String,
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    /// OpenAI-compatible chat-completions endpoint.
    pub endpoint: String,
    pub model: String,
    /// Bearer token. Usually supplied through the environment.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Input text is cut to this many characters before prompting.
    pub max_input_chars: usize,
    pub retry: RetryPolicy,
}

/// How the classifier client retries failed attempts.
///
/// The default is three attempts with a fixed 15s wait in between. Setting
/// `exponential` doubles the wait after each failure up to
/// `max_backoff_secs`, and `jitter_ms` adds a random extra delay.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub exponential: bool,
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PublisherConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Period of the processing timer; at most one item starts per tick.
    pub tick_interval_secs: u64,
    /// Period of the drain check.
    pub drain_poll_millis: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            companies_path: PathBuf::from("companies.json"),
            source: SourceConfig::default(),
            classifier: ClassifierConfig::default(),
            publisher: PublisherConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            label: "Sahi Buzz".to_string(),
            item_selector: ".bg-surface-neutral-l1-dark > div".to_string(),
            fetch_timeout_secs: 60,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_CLASSIFIER_ENDPOINT.to_string(),
            model: DEFAULT_CLASSIFIER_MODEL.to_string(),
            api_key: None,
            temperature: 0.1,
            timeout_secs: 60,
            max_input_chars: 1500,
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 15,
            max_backoff_secs: 120,
            exponential: false,
            jitter_ms: 0,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_PUBLISH_ENDPOINT.to_string(),
            timeout_secs: 60,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            drain_poll_millis: 1000,
        }
    }
}

impl PipelineConfig {
    /// Load from a YAML file, or return defaults when no path is given.
    #[instrument(level = "info", skip_all)]
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            None => Self::default(),
            Some(path) => {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| ConfigError::Io {
                        path: path.to_path_buf(),
                        source,
                    })?;
                let config: Self = serde_yaml::from_str(&text)?;
                info!(path = %path.display(), "Loaded configuration file");
                config
            }
        };
        Ok(config)
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PublisherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_millis)
    }
}

impl RetryPolicy {
    #[cfg(test)]
    pub fn fixed(max_attempts: usize, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff_secs: backoff.as_secs(),
            ..Self::default()
        }
    }

    /// Wait before the attempt following failed attempt number `attempt`
    /// (1-based), excluding jitter.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let base = Duration::from_secs(self.backoff_secs);
        if !self.exponential {
            return base;
        }
        let shift = attempt.saturating_sub(1).min(31) as u32;
        base.saturating_mul(1 << shift)
            .min(Duration::from_secs(self.max_backoff_secs))
    }
}
