//! Company ticker whitelist.
//!
//! The registry is loaded once at startup and shared read-only for the rest of
//! the run. Loading is fail-open: a missing or malformed company list yields an
//! empty registry, which makes the validator reject every classification
//! instead of stopping the run.

use crate::errors::RegistryLoadError;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{error, info, instrument};

/// Upper-cased ticker symbols accepted by the validator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompanyRegistry {
    tickers: BTreeSet<String>,
}

impl CompanyRegistry {
    /// Read and parse the company list at `path`, falling back to an empty
    /// registry on any error.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let result = match tokio::fs::read_to_string(path).await {
            Ok(data) => Self::parse(&data),
            Err(source) => Err(RegistryLoadError::Io {
                path: path.to_path_buf(),
                source,
            }),
        };

        match result {
            Ok(registry) => {
                info!(count = registry.len(), "Loaded valid company codes");
                registry
            }
            Err(e) => {
                error!(error = %e, "Company loading failed; every classification will be rejected");
                Self::default()
            }
        }
    }

    /// Parse a JSON array of `{nsc | ticker, name}` entries.
    ///
    /// Entries missing either a symbol or a name are skipped, as are array
    /// elements that are not objects.
    pub fn parse(data: &str) -> Result<Self, RegistryLoadError> {
        let companies: Value = serde_json::from_str(data)?;
        let Value::Array(companies) = companies else {
            return Err(RegistryLoadError::NotAnArray);
        };

        let tickers = companies
            .iter()
            .filter_map(|company| {
                let symbol = non_empty_str(company.get("ticker"))
                    .or_else(|| non_empty_str(company.get("nsc")))?;
                non_empty_str(company.get("name"))?;
                Some(symbol.trim().to_uppercase())
            })
            .collect();

        Ok(Self { tickers })
    }

    /// Build a registry straight from symbols, normalised like [`CompanyRegistry::parse`].
    #[cfg(test)]
    pub fn from_tickers<I, S>(tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tickers: tickers
                .into_iter()
                .map(|t| t.as_ref().trim().to_uppercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Case- and whitespace-insensitive membership test.
    pub fn contains(&self, symbol: &str) -> bool {
        self.tickers.contains(&symbol.trim().to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    /// Tickers in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tickers.iter().map(String::as_str)
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_normalizes_and_dedupes() {
        let json = r#"[
            {"nsc": "tcs", "name": "Tata Consultancy Services"},
            {"nsc": "TCS ", "name": "TCS duplicate"},
            {"ticker": "infy", "name": "Infosys"},
            {"nsc": "NONAME"},
            {"nsc": "", "name": "Blank symbol"},
            {"name": "No symbol"},
            "not an object"
        ]"#;

        let registry = CompanyRegistry::parse(json).unwrap();
        assert_eq!(registry.iter().collect::<Vec<_>>(), vec!["INFY", "TCS"]);
        assert!(registry.contains(" tcs"));
        assert!(!registry.contains("NONAME"));
    }

    #[test]
    fn test_parse_rejects_non_array() {
        let err = CompanyRegistry::parse(r#"{"nsc": "TCS", "name": "Tata"}"#).unwrap_err();
        assert!(matches!(err, RegistryLoadError::NotAnArray));
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let err = CompanyRegistry::parse("[{").unwrap_err();
        assert!(matches!(err, RegistryLoadError::Json(_)));
    }

    #[test]
    fn test_from_tickers() {
        let registry = CompanyRegistry::from_tickers(["abc", "", "Def"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("ABC"));
        assert!(registry.contains("def"));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"nsc": "reliance", "name": "Reliance Industries"}}]"#).unwrap();

        let registry = CompanyRegistry::load(file.path()).await;
        assert!(registry.contains("RELIANCE"));
    }

    #[tokio::test]
    async fn test_load_missing_file_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CompanyRegistry::load(dir.path().join("companies.json")).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_load_malformed_file_fails_open() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"companies": []}}"#).unwrap();

        let registry = CompanyRegistry::load(file.path()).await;
        assert!(registry.is_empty());
    }
}
