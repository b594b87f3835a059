//! Pipeline configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. CLI flags override individual values after loading.

use crate::executor::ExecutorConfig;
use sentitap_core::data::{augmento, bitmex, RetryPolicy};
use sentitap_core::AuditPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Base URL and per-call row cap for one upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    pub row_cap: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding parquet artifacts, sidecars and the Augmento summary.
    pub cache_dir: PathBuf,
    pub executor: ExecutorConfig,
    pub retry: RetryPolicy,
    pub audit: AuditPolicy,
    pub augmento: SourceConfig,
    pub bitmex: SourceConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("data/cache"),
            executor: ExecutorConfig::default(),
            retry: RetryPolicy::default(),
            audit: AuditPolicy::default(),
            augmento: SourceConfig {
                base_url: augmento::DEFAULT_BASE_URL.into(),
                row_cap: augmento::DEFAULT_ROW_CAP,
            },
            bitmex: SourceConfig {
                base_url: bitmex::DEFAULT_BASE_URL.into(),
                row_cap: bitmex::DEFAULT_ROW_CAP,
            },
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from `path` if given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.concurrency == 0 {
            return Err(ConfigError::Invalid("executor.concurrency must be at least 1".into()));
        }
        if self.executor.window_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "executor.window_timeout_secs must be at least 1".into(),
            ));
        }
        if self.augmento.row_cap == 0 {
            return Err(ConfigError::Invalid("augmento.row_cap must be at least 1".into()));
        }
        if self.bitmex.row_cap == 0 || self.bitmex.row_cap > bitmex::MAX_ROW_CAP {
            return Err(ConfigError::Invalid(format!(
                "bitmex.row_cap must be between 1 and {}",
                bitmex::MAX_ROW_CAP
            )));
        }
        if self.audit.heavy_tail_ratio <= 0.0 {
            return Err(ConfigError::Invalid("audit.heavy_tail_ratio must be positive".into()));
        }
        Ok(())
    }

    /// Where the Augmento metadata summary is persisted.
    pub fn summary_path(&self) -> PathBuf {
        self.cache_dir.join(augmento::SUMMARY_FILE_NAME)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.executor.concurrency, 6);
        assert_eq!(config.bitmex.row_cap, 750);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn sections_override_individual_fields() {
        let config = PipelineConfig::from_toml_str(
            r#"
            cache_dir = "/tmp/sentitap"

            [executor]
            concurrency = 2

            [audit]
            heavy_tail_ratio = 4.0
            excluded_columns = ["t_epoch", "twitter_hacks"]

            [bitmex]
            base_url = "http://localhost:9000"
            row_cap = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.cache_dir, PathBuf::from("/tmp/sentitap"));
        assert_eq!(config.executor.concurrency, 2);
        assert_eq!(config.executor.window_timeout_secs, 30);
        assert_eq!(config.audit.heavy_tail_ratio, 4.0);
        assert!(config.audit.flag_constant_columns);
        assert_eq!(config.audit.excluded_columns.len(), 2);
        assert_eq!(config.bitmex.row_cap, 1000);
        assert_eq!(config.augmento.base_url, augmento::DEFAULT_BASE_URL);
        assert_eq!(
            config.summary_path(),
            PathBuf::from("/tmp/sentitap/augmento_api_summary.json")
        );
    }

    #[test]
    fn oversized_bitmex_cap_is_rejected() {
        let err = PipelineConfig::from_toml_str("[bitmex]\nbase_url = \"x\"\nrow_cap = 1001\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_types_fail_to_parse() {
        let err = PipelineConfig::from_toml_str("[executor]\nconcurrency = \"many\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn defaults_round_trip_through_toml() {
        let text = PipelineConfig::default().to_toml_string().unwrap();
        assert_eq!(PipelineConfig::from_toml_str(&text).unwrap(), PipelineConfig::default());
    }
}
