//! Run configuration loaded from TOML
//!
//! ```toml
//! database_path = "cards.db"
//! reference_path = "reference.json"
//! source_timeout_secs = 15
//! min_persist_confidence = 0.3
//!
//! [[sources]]
//! id = "ratehub"
//! path = "scrapes/ratehub.json"
//! format = "json"
//! ```

use crate::error::{ReconError, Result};
use crate::sources::{CsvFileAdapter, JsonFileAdapter, SourceAdapter};
use crate::store::DEFAULT_SHARD_COUNT;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const CONFIG_ENV_VAR: &str = "CARD_RECON_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "card-recon.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Json,
    Csv,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub id: String,
    pub path: PathBuf,
    pub format: SourceFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub database_path: PathBuf,
    pub reference_path: PathBuf,
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,
    #[serde(default = "default_min_persist_confidence")]
    pub min_persist_confidence: f64,
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_source_timeout_secs() -> u64 {
    15
}

fn default_min_persist_confidence() -> f64 {
    0.3
}

fn default_shard_count() -> usize {
    DEFAULT_SHARD_COUNT
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Config file location, by priority:
/// 1. Command-line argument
/// 2. `CARD_RECON_CONFIG` environment variable
/// 3. `card-recon.toml` in the working directory
pub fn resolve_config_path(cli_arg: Option<&str>) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

impl RunConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReconError::Configuration(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Reject configurations the run cannot start from. Runs before the
    /// repository is opened.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(ReconError::Configuration("database_path is empty".to_string()));
        }
        if self.reference_path.as_os_str().is_empty() {
            return Err(ReconError::Configuration("reference_path is empty".to_string()));
        }
        if !self.reference_path.exists() {
            return Err(ReconError::Configuration(format!(
                "reference table {} not found",
                self.reference_path.display()
            )));
        }
        if self.sources.is_empty() {
            return Err(ReconError::Configuration("no sources configured".to_string()));
        }
        if self.shard_count == 0 {
            return Err(ReconError::Configuration("shard_count must be at least 1".to_string()));
        }
        if self.source_timeout_secs == 0 {
            return Err(ReconError::Configuration("source_timeout_secs must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_persist_confidence) {
            return Err(ReconError::Configuration(format!(
                "min_persist_confidence {} outside [0, 1]",
                self.min_persist_confidence
            )));
        }

        let mut ids = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(ReconError::Configuration("source with empty id".to_string()));
            }
            if !ids.insert(source.id.as_str()) {
                return Err(ReconError::Configuration(format!("duplicate source id '{}'", source.id)));
            }
        }
        Ok(())
    }

    /// One adapter per configured source, in configuration order
    pub fn build_adapters(&self) -> Vec<Arc<dyn SourceAdapter>> {
        self.sources
            .iter()
            .map(|spec| -> Arc<dyn SourceAdapter> {
                match spec.format {
                    SourceFormat::Json => Arc::new(JsonFileAdapter::new(&spec.id, &spec.path)),
                    SourceFormat::Csv => Arc::new(CsvFileAdapter::new(&spec.id, &spec.path)),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        database_path = "cards.db"
        reference_path = "reference.json"

        [[sources]]
        id = "ratehub"
        path = "ratehub.json"
        format = "json"

        [[sources]]
        id = "bank-sites"
        path = "banks.csv"
        format = "csv"
    "#;

    #[test]
    fn test_defaults_applied() {
        let config = RunConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.source_timeout_secs, 15);
        assert_eq!(config.min_persist_confidence, 0.3);
        assert_eq!(config.shard_count, DEFAULT_SHARD_COUNT);
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[1].format, SourceFormat::Csv);
    }

    #[test]
    fn test_missing_reference_fails_validation() {
        let config = RunConfig::from_toml_str(SAMPLE).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ReconError::Configuration(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_validation_rules() {
        let reference = tempfile::NamedTempFile::new().unwrap();
        let mut config = RunConfig::from_toml_str(SAMPLE).unwrap();
        config.reference_path = reference.path().to_path_buf();
        assert!(config.validate().is_ok());

        let mut bad = config.clone();
        bad.min_persist_confidence = 1.5;
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.sources[1].id = "ratehub".to_string();
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.sources.clear();
        assert!(bad.validate().is_err());

        let mut bad = config;
        bad.shard_count = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(matches!(RunConfig::from_toml_str("database_path = "), Err(ReconError::Toml(_))));
    }

    #[test]
    fn test_explicit_path_wins() {
        assert_eq!(resolve_config_path(Some("/etc/cards.toml")), PathBuf::from("/etc/cards.toml"));
    }

    #[test]
    fn test_build_adapters_in_order() {
        let config = RunConfig::from_toml_str(SAMPLE).unwrap();
        let ids: Vec<String> = config
            .build_adapters()
            .iter()
            .map(|a| a.source_id().to_string())
            .collect();
        assert_eq!(ids, vec!["ratehub", "bank-sites"]);
    }
}
