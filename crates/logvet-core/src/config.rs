//! Configuration management for logvet
//!
//! Handles loading and validation of logvet.toml configuration files. CLI
//! flags are merged over these values by the binary crate.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LogvetConfig {
    /// Log store (ground truth) settings
    #[serde(default)]
    pub log_store: LogStoreConfig,

    /// Search backend (system under test) settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Code fallback search settings
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Test run settings
    #[serde(default)]
    pub run: RunConfig,

    /// Output artifact settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Log store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogStoreConfig {
    /// Log store API base URL
    #[serde(default = "default_log_store_url")]
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            url: default_log_store_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_log_store_url() -> String {
    "http://localhost:9428".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Search backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Search backend base URL
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Optional codebase filter passed with every search
    #[serde(default)]
    pub codebase: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            timeout_secs: default_timeout_secs(),
            codebase: None,
        }
    }
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

/// Code fallback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Source tree searched by the code fallback
    #[serde(default = "default_source_path")]
    pub source_path: PathBuf,

    /// Per-invocation ripgrep timeout in seconds
    #[serde(default = "default_fallback_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum matches considered per query
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            source_path: default_source_path(),
            timeout_secs: default_fallback_timeout_secs(),
            max_results: default_max_results(),
        }
    }
}

fn default_source_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_fallback_timeout_secs() -> u64 {
    10
}

fn default_max_results() -> usize {
    10
}

/// Test run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Log store query used to fetch candidate logs
    #[serde(default)]
    pub query: String,

    /// Query window start (RFC3339). Defaults to today 00:00:00 UTC.
    #[serde(default)]
    pub start: Option<String>,

    /// Query window end (RFC3339). Defaults to today 23:59:59 UTC.
    #[serde(default)]
    pub end: Option<String>,

    /// Maximum number of logs to test
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Maximum concurrent backend searches
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Results requested per backend search
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum Jaccard similarity for a code match to count as evidence
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            query: String::new(),
            start: None,
            end: None,
            limit: default_limit(),
            concurrency: default_concurrency(),
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_limit() -> usize {
    100
}

fn default_concurrency() -> usize {
    5
}

fn default_top_k() -> usize {
    5
}

fn default_similarity_threshold() -> f64 {
    0.5
}

/// Output artifact configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// JSON output file path
    #[serde(default = "default_json_path")]
    pub json: PathBuf,

    /// Markdown report file path
    #[serde(default = "default_report_path")]
    pub report: PathBuf,

    /// CSV metrics file path
    #[serde(default = "default_csv_path")]
    pub csv: PathBuf,

    /// Checkpoint file for resume
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_file: PathBuf,

    /// Save the checkpoint every N completed items
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            json: default_json_path(),
            report: default_report_path(),
            csv: default_csv_path(),
            checkpoint_file: default_checkpoint_path(),
            checkpoint_every: default_checkpoint_every(),
        }
    }
}

fn default_json_path() -> PathBuf {
    PathBuf::from("test_results.json")
}

fn default_report_path() -> PathBuf {
    PathBuf::from("test_report.md")
}

fn default_csv_path() -> PathBuf {
    PathBuf::from("test_metrics.csv")
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from(".logvet_checkpoint.json")
}

fn default_checkpoint_every() -> usize {
    10
}

impl LogvetConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Query window start in RFC3339 form, defaulting to today 00:00:00 UTC.
    #[must_use]
    pub fn start_rfc3339(&self) -> String {
        self.run
            .start
            .clone()
            .unwrap_or_else(|| format!("{}T00:00:00Z", Utc::now().format("%Y-%m-%d")))
    }

    /// Query window end in RFC3339 form, defaulting to today 23:59:59 UTC.
    #[must_use]
    pub fn end_rfc3339(&self) -> String {
        self.run
            .end
            .clone()
            .unwrap_or_else(|| format!("{}T23:59:59Z", Utc::now().format("%Y-%m-%d")))
    }

    /// Validate cross-field constraints.
    ///
    /// Bounds mirror what the backends can sustain; anything outside them is
    /// a configuration mistake, not a tunable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.query.is_empty() {
            return Err(ConfigError::Invalid {
                field: "run.query".into(),
                reason: "query must not be empty".into(),
            });
        }
        if self.run.limit == 0 || self.run.limit > 10_000 {
            return Err(ConfigError::Invalid {
                field: "run.limit".into(),
                reason: "limit must be between 1 and 10000".into(),
            });
        }
        if self.run.concurrency == 0 || self.run.concurrency > 50 {
            return Err(ConfigError::Invalid {
                field: "run.concurrency".into(),
                reason: "concurrency must be between 1 and 50".into(),
            });
        }
        if self.run.top_k == 0 {
            return Err(ConfigError::Invalid {
                field: "run.top_k".into(),
                reason: "top_k must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.run.similarity_threshold) {
            return Err(ConfigError::Invalid {
                field: "run.similarity_threshold".into(),
                reason: "similarity threshold must be within [0, 1]".into(),
            });
        }
        if self.log_store.timeout_secs < 5 || self.log_store.timeout_secs > 300 {
            return Err(ConfigError::Invalid {
                field: "log_store.timeout_secs".into(),
                reason: "timeout must be between 5 and 300 seconds".into(),
            });
        }
        if self.backend.timeout_secs < 5 || self.backend.timeout_secs > 300 {
            return Err(ConfigError::Invalid {
                field: "backend.timeout_secs".into(),
                reason: "timeout must be between 5 and 300 seconds".into(),
            });
        }
        if self.output.checkpoint_every == 0 {
            return Err(ConfigError::Invalid {
                field: "output.checkpoint_every".into(),
                reason: "checkpoint interval must be at least 1".into(),
            });
        }

        if !self.fallback.source_path.exists() {
            return Err(ConfigError::Invalid {
                field: "fallback.source_path".into(),
                reason: format!(
                    "source path does not exist: {}",
                    self.fallback.source_path.display()
                ),
            });
        }
        if !self.fallback.source_path.is_dir() {
            return Err(ConfigError::Invalid {
                field: "fallback.source_path".into(),
                reason: format!(
                    "source path is not a directory: {}",
                    self.fallback.source_path.display()
                ),
            });
        }

        let start = parse_rfc3339("run.start", &self.start_rfc3339())?;
        let end = parse_rfc3339("run.end", &self.end_rfc3339())?;
        if end < start {
            return Err(ConfigError::Invalid {
                field: "run.end".into(),
                reason: "end must not precede start".into(),
            });
        }

        Ok(())
    }
}

fn parse_rfc3339(field: &str, value: &str) -> Result<DateTime<Utc>, ConfigError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ConfigError::Invalid {
            field: field.to_string(),
            reason: format!("not an RFC3339 timestamp ({e}): {value}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> LogvetConfig {
        LogvetConfig {
            run: RunConfig {
                query: "error".into(),
                ..RunConfig::default()
            },
            fallback: FallbackConfig {
                source_path: std::env::temp_dir(),
                ..FallbackConfig::default()
            },
            ..LogvetConfig::default()
        }
    }

    #[test]
    fn defaults_validate_once_query_and_path_set() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn empty_query_rejected() {
        let mut config = valid_config();
        config.run.query.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut config = valid_config();
        config.run.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let mut config = valid_config();
        config.run.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_source_path_rejected() {
        let mut config = valid_config();
        config.fallback.source_path = PathBuf::from("/definitely/not/a/real/path");
        assert!(config.validate().is_err());
    }

    #[test]
    fn end_before_start_rejected() {
        let mut config = valid_config();
        config.run.start = Some("2025-11-17T10:00:00Z".into());
        config.run.end = Some("2025-11-17T09:00:00Z".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn window_defaults_to_today_utc() {
        let config = valid_config();
        let start = config.start_rfc3339();
        let end = config.end_rfc3339();
        assert!(start.ends_with("T00:00:00Z"));
        assert!(end.ends_with("T23:59:59Z"));
    }

    #[test]
    fn parses_sectioned_toml() {
        let text = r#"
            [log_store]
            url = "http://victoria:9428"

            [backend]
            url = "http://search:8000"
            codebase = "backend-rust"

            [run]
            query = "level:error"
            limit = 250
            concurrency = 8
            similarity_threshold = 0.6

            [output]
            checkpoint_every = 25
        "#;
        let config: LogvetConfig = toml::from_str(text).unwrap();
        assert_eq!(config.log_store.url, "http://victoria:9428");
        assert_eq!(config.backend.codebase.as_deref(), Some("backend-rust"));
        assert_eq!(config.run.limit, 250);
        assert!((config.run.similarity_threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.output.checkpoint_every, 25);
        // Untouched sections keep defaults
        assert_eq!(config.fallback.max_results, 10);
    }
}
