//! Error types for logvet-core

use std::fmt::Write;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a suggested command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for logvet-core
#[derive(Error, Debug)]
pub enum Error {
    /// Log store client errors
    #[error("Log store error: {0}")]
    LogStore(#[from] LogStoreError),

    /// Search backend client errors
    #[error("Search backend error: {0}")]
    Backend(#[from] BackendError),

    /// Code fallback search errors
    #[error("Fallback error: {0}")]
    Fallback(#[from] FallbackError),

    /// Checkpoint errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Report generation errors
    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime errors (task join failures, channel failures, etc.)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::LogStore(err) => Some(err.remediation()),
            Self::Backend(err) => Some(err.remediation()),
            Self::Checkpoint(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .alternative("Verify the output directory exists and is writable."),
            ),
            Self::Json(_) => Some(
                Remediation::new("Validate the JSON input and retry.")
                    .command("Validate JSON", "python -m json.tool < input.json"),
            ),
            Self::Fallback(_) | Self::Report(_) | Self::Runtime(_) => None,
        }
    }
}

/// Log store (ground-truth log source) errors
#[derive(Error, Debug)]
pub enum LogStoreError {
    /// HTTP transport failure (connect, timeout, TLS)
    #[error("log store request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("log store returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body excerpt
        body: String,
    },
}

impl LogStoreError {
    /// Remediation guidance for log store failures.
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        Remediation::new("Verify the log store is reachable and the query is valid.")
            .command("Health check", "lv health")
            .alternative("Check the --log-store-url value and network connectivity.")
    }
}

/// Search backend (system under test) errors
#[derive(Error, Debug)]
pub enum BackendError {
    /// HTTP transport failure (connect, timeout, TLS)
    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("search backend returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body excerpt
        body: String,
    },

    /// Response body was not valid JSON of the expected shape
    #[error("invalid search response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Remediation guidance for backend failures.
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        Remediation::new("Verify the search backend is up and serving /api/search.")
            .command("Health check", "lv health")
            .command("List codebases", "lv codebases")
            .alternative("Check the --search-url value and the backend logs.")
    }
}

/// Code fallback search errors
///
/// These are rare by design: a missing ripgrep binary or a timeout degrade to
/// an empty match list rather than an error, so only structural failures
/// (invalid keyword pattern) surface here.
#[derive(Error, Debug)]
pub enum FallbackError {
    /// Constructed search pattern was rejected
    #[error("invalid code search pattern: {0}")]
    InvalidPattern(String),
}

/// Checkpoint persistence errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Checkpoint file does not exist (distinct from malformed: resume can
    /// start fresh on NotFound but must not trust a corrupt file)
    #[error("checkpoint file not found: {0}")]
    NotFound(String),

    /// Checkpoint file exists but cannot be parsed
    #[error("invalid checkpoint file: {0}")]
    Malformed(String),

    /// Checkpoint could not be written
    #[error("failed to write checkpoint: {0}")]
    Write(String),
}

impl CheckpointError {
    /// Remediation guidance for checkpoint failures.
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::NotFound(_) => Remediation::new("Run without --resume to start a fresh run.")
                .alternative("Check the --checkpoint-file path."),
            Self::Malformed(_) => {
                Remediation::new("Delete the corrupt checkpoint and start a fresh run.")
                    .alternative("A corrupt checkpoint cannot be trusted for resume decisions.")
            }
            Self::Write(_) => {
                Remediation::new("Check free disk space and permissions on the checkpoint path.")
            }
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file missing
    #[error("config file not found: {0}")]
    FileNotFound(String),

    /// Config file cannot be parsed
    #[error("failed to parse config: {0}")]
    ParseError(String),

    /// A config value failed validation
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Field that failed validation
        field: String,
        /// Why it was rejected
        reason: String,
    },
}

impl ConfigError {
    /// Remediation guidance for configuration failures.
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        Remediation::new("Fix the configuration value and retry.")
            .command("Show help", "lv run --help")
            .alternative("Check logvet.toml for typos or out-of-range values.")
    }
}

/// Report generation errors
#[derive(Error, Debug)]
pub enum ReportError {
    /// Formatting into the output buffer failed
    #[error("failed to format report: {0}")]
    FormatError(String),
}
