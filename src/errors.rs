//! Error types for each stage of the pipeline.
//!
//! Only [`SourceError`] and [`ConfigError`] are ever fatal, and only at
//! startup. Everything raised while an item is being processed is logged and
//! the item is dropped.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to read or parse the company list.
///
/// The registry never surfaces this to `main`; it logs it and falls back to an
/// empty whitelist.
#[derive(Error, Debug)]
pub enum RegistryLoadError {
    #[error("failed to read company list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("company list is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid company list format: expected a JSON array")]
    NotAnArray,
}

/// A single failed classifier attempt. Every variant counts toward the retry
/// budget except [`ClassifierError::Interrupted`], which ends the loop.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("classifier transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("classifier timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("classifier returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed classifier response: {0}")]
    Malformed(String),

    #[error("classifier call interrupted by shutdown")]
    Interrupted,
}

impl ClassifierError {
    /// Map a reqwest failure, splitting out timeouts so they log distinctly.
    pub fn from_request(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            ClassifierError::Timeout { timeout_secs }
        } else {
            ClassifierError::Transport(err)
        }
    }
}

/// Failure to acquire the initial items. Fatal for the run.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read item source {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch item source: {0}")]
    Http(#[from] reqwest::Error),

    #[error("item source returned HTTP {0}")]
    Status(u16),

    #[error("item source is not a valid item list: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid selector {selector}: {message}")]
    Selector { selector: String, message: String },
}

/// Failure to load the optional YAML configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
