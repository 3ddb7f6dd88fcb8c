//! Configuration Module
//!
//! Handles loading configuration from:
//! 1. `KS_CONFIG`, ~/.kestrel/config.toml or ./config.toml (first found)
//! 2. Environment variables (override TOML values)
//!
//! Environment variables take precedence over TOML config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::{env, fs};
use tracing::{info, warn};

use crate::sequencer::{BatchConfig, PipelineConfig, ProverMode, SettlerConfig};

const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_DIR_NAME: &str = ".kestrel";

/// Root configuration structure (matches TOML layout)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KestrelConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tree: TreeConfig,
    #[serde(default)]
    pub batch: BatchTomlConfig,
    #[serde(default)]
    pub pipeline: PipelineTomlConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "./kestrel-db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Accumulator depth; capacity is 2^depth accounts
    #[serde(default = "default_tree_depth")]
    pub depth: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            depth: default_tree_depth(),
        }
    }
}

fn default_tree_depth() -> usize {
    32
}

/// Batch configuration (TOML format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTomlConfig {
    #[serde(default = "default_max_transactions")]
    pub max_transactions: usize,
    #[serde(default = "default_max_batch_age")]
    pub max_batch_age_secs: u64,
    #[serde(default = "default_min_transactions")]
    pub min_transactions: usize,
    #[serde(default = "default_parallel_validation")]
    pub parallel_validation: bool,
}

impl Default for BatchTomlConfig {
    fn default() -> Self {
        Self {
            max_transactions: default_max_transactions(),
            max_batch_age_secs: default_max_batch_age(),
            min_transactions: default_min_transactions(),
            parallel_validation: default_parallel_validation(),
        }
    }
}

fn default_max_transactions() -> usize {
    100
}

fn default_max_batch_age() -> u64 {
    60
}

fn default_min_transactions() -> usize {
    1
}

fn default_parallel_validation() -> bool {
    true
}

/// Pipeline configuration (TOML format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTomlConfig {
    /// "reference" or "mock"
    #[serde(default)]
    pub prover_mode: ProverMode,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_settlement_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub settlement_retry_base_ms: u64,
}

impl Default for PipelineTomlConfig {
    fn default() -> Self {
        Self {
            prover_mode: ProverMode::default(),
            poll_interval_ms: default_poll_interval(),
            max_settlement_retries: default_max_retries(),
            settlement_retry_base_ms: default_retry_base_ms(),
        }
    }
}

fn default_poll_interval() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_base_ms() -> u64 {
    1000
}

impl KestrelConfig {
    /// Load configuration from the first config file found, with env var overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(config_path) => {
                info!(path = %config_path.display(), "loading config");
                let contents = fs::read_to_string(&config_path).with_context(|| {
                    format!("failed to read config file: {}", config_path.display())
                })?;
                toml::from_str(&contents).with_context(|| {
                    format!("failed to parse config file: {}", config_path.display())
                })?
            }
            None => {
                info!("no config file found, using defaults and environment variables");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("KS_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            warn!(path = %path.display(), "KS_CONFIG points at a missing file");
        }

        if let Some(config_path) = Self::default_config_path() {
            if config_path.exists() {
                return Some(config_path);
            }
        }

        let local_path = PathBuf::from(CONFIG_FILE_NAME);
        if local_path.exists() {
            return Some(local_path);
        }

        None
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply `KS_*` overrides from `lookup`. Unparseable values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = lookup(key)?;
            match raw.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(key, value = %raw, "ignoring unparseable override");
                    None
                }
            }
        }

        if let Some(v) = lookup("KS_DB_PATH") {
            self.database.path = v;
        }
        if let Some(n) = parsed(&lookup, "KS_TREE_DEPTH") {
            self.tree.depth = n;
        }

        if let Some(n) = parsed(&lookup, "KS_BATCH_MAX_TXS") {
            self.batch.max_transactions = n;
        }
        if let Some(n) = parsed(&lookup, "KS_BATCH_MAX_AGE") {
            self.batch.max_batch_age_secs = n;
        }
        if let Some(n) = parsed(&lookup, "KS_BATCH_MIN_TXS") {
            self.batch.min_transactions = n;
        }
        if let Some(v) = lookup("KS_PARALLEL_VALIDATION") {
            self.batch.parallel_validation = v == "1" || v.eq_ignore_ascii_case("true");
        }

        if let Some(mode) = parsed(&lookup, "KS_PROVER_MODE") {
            self.pipeline.prover_mode = mode;
        }
        if let Some(n) = parsed(&lookup, "KS_POLL_MS") {
            self.pipeline.poll_interval_ms = n;
        }
        if let Some(n) = parsed(&lookup, "KS_SETTLEMENT_RETRIES") {
            self.pipeline.max_settlement_retries = n;
        }
        if let Some(n) = parsed(&lookup, "KS_SETTLEMENT_RETRY_BASE_MS") {
            self.pipeline.settlement_retry_base_ms = n;
        }
    }

    pub fn to_batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_transactions: self.batch.max_transactions,
            max_batch_age_secs: self.batch.max_batch_age_secs,
            min_transactions: self.batch.min_transactions,
            parallel_validation: self.batch.parallel_validation,
            tree_depth: self.tree.depth,
        }
    }

    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            prover_mode: self.pipeline.prover_mode,
            poll_interval_ms: self.pipeline.poll_interval_ms,
            batch_config: self.to_batch_config(),
            settler_config: SettlerConfig {
                max_retries: self.pipeline.max_settlement_retries,
                retry_base_ms: self.pipeline.settlement_retry_base_ms,
            },
        }
    }

    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Generate a sample config file
    pub fn generate_sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = KestrelConfig::default();
        assert_eq!(config.database.path, "./kestrel-db");
        assert_eq!(config.tree.depth, 32);
        assert_eq!(config.pipeline.prover_mode, ProverMode::Reference);
        assert!(config.batch.parallel_validation);
    }

    #[test]
    fn test_parse_sample() {
        let sample = KestrelConfig::generate_sample();
        assert!(sample.contains("[database]"));
        assert!(sample.contains("[tree]"));
        assert!(sample.contains("[pipeline]"));

        let parsed: KestrelConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.batch.max_transactions, 100);
        assert_eq!(parsed.pipeline.poll_interval_ms, 100);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: KestrelConfig = toml::from_str(
            r#"
            [tree]
            depth = 16

            [pipeline]
            prover_mode = "mock"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.tree.depth, 16);
        assert_eq!(parsed.pipeline.prover_mode, ProverMode::Mock);
        assert_eq!(parsed.pipeline.max_settlement_retries, 5);
        assert_eq!(parsed.database.path, "./kestrel-db");
    }

    #[test]
    fn test_overrides_win_over_file_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("KS_TREE_DEPTH", "20"),
            ("KS_BATCH_MAX_TXS", "7"),
            ("KS_PROVER_MODE", "MOCK"),
            ("KS_PARALLEL_VALIDATION", "false"),
            ("KS_SETTLEMENT_RETRIES", "not-a-number"),
        ]);
        let mut config = KestrelConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.tree.depth, 20);
        assert_eq!(config.batch.max_transactions, 7);
        assert_eq!(config.pipeline.prover_mode, ProverMode::Mock);
        assert!(!config.batch.parallel_validation);
        assert_eq!(config.pipeline.max_settlement_retries, 5);

        let pipeline = config.to_pipeline_config();
        assert_eq!(pipeline.batch_config.tree_depth, 20);
        assert_eq!(pipeline.settler_config.max_retries, 5);
    }
}
