//! Data model shared across the validation pipeline.
//!
//! Wire-facing types (candidate logs, backend hits, ripgrep matches) are
//! parsed tolerantly: unknown fields are preserved or ignored, and malformed
//! optional structure degrades to empty rather than failing the run.
//! `TestResult` is the one type that must round-trip losslessly, since it is
//! persisted in checkpoints and re-read on resume.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Candidate logs
// =============================================================================

/// A log entry fetched from the ground-truth log store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateLog {
    /// The log message content (`_msg` field).
    pub message: String,
    /// Timestamp in RFC3339 form (`_time` field).
    pub timestamp: String,
    /// Stream labels (`_stream` field, parsed).
    #[serde(default)]
    pub stream: BTreeMap<String, String>,
    /// Any additional non-underscore fields from the entry.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl CandidateLog {
    /// Parse a candidate log from one JSONL object.
    ///
    /// The `_stream` field may arrive pre-parsed as an object or as an
    /// embedded JSON string; both forms are accepted. An unparsable embedded
    /// string degrades to an empty label map.
    #[must_use]
    pub fn from_json(data: &Value) -> Self {
        let message = data
            .get("_msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let timestamp = data
            .get("_time")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let stream = match data.get("_stream") {
            Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
                .ok()
                .as_ref()
                .map(stream_labels)
                .unwrap_or_default(),
            Some(v) => stream_labels(v),
            None => BTreeMap::new(),
        };

        let extra = data
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter(|(k, _)| !k.starts_with('_'))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            message,
            timestamp,
            stream,
            extra,
        }
    }
}

fn stream_labels(value: &Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// Search backend results
// =============================================================================

/// One ranked result row from the search backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Backend-assigned identifier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Relevance score, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Matched text, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Arbitrary backend metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Response to one backend search, as observed by the client.
///
/// `total_found` is always the count of returned rows, never a
/// server-reported total: fallback behavior is driven by observed evidence,
/// not backend self-reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSearchResult {
    /// Ranked result rows.
    pub hits: Vec<SearchHit>,
    /// Count of returned rows (`hits.len()`).
    pub total_found: usize,
    /// Client-measured response time in milliseconds.
    pub response_time_ms: f64,
}

impl BackendSearchResult {
    /// Build a result from returned rows and a measured duration.
    #[must_use]
    pub fn new(hits: Vec<SearchHit>, response_time_ms: f64) -> Self {
        let total_found = hits.len();
        Self {
            hits,
            total_found,
            response_time_ms,
        }
    }

    /// Score of the top-ranked hit, when present.
    #[must_use]
    pub fn best_score(&self) -> Option<f64> {
        self.hits.first().and_then(|hit| hit.score)
    }
}

/// Codebase descriptor from the backend's diagnostics endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodebaseInfo {
    /// Codebase name.
    #[serde(default)]
    pub name: String,
    /// Number of indexed log statements, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_logs: Option<u64>,
    /// Anything else the server includes.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// =============================================================================
// Code search matches
// =============================================================================

/// A source line located by the code fallback search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeMatch {
    /// Path of the file containing the match.
    pub file_path: String,
    /// 1-based line number.
    pub line_number: u64,
    /// Matched line content, trimmed.
    pub line_text: String,
    /// Column of the first submatch, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u64>,
}

impl CodeMatch {
    /// Parse a match from one ripgrep `--json` event.
    ///
    /// Returns `None` for non-`match` events (begin/end/context/summary).
    #[must_use]
    pub fn from_ripgrep_json(event: &Value) -> Option<Self> {
        if event.get("type").and_then(Value::as_str) != Some("match") {
            return None;
        }
        let data = event.get("data")?;

        let file_path = data
            .get("path")
            .and_then(|p| p.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let line_number = data
            .get("line_number")
            .and_then(Value::as_u64)
            .unwrap_or_default();
        let line_text = data
            .get("lines")
            .and_then(|l| l.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        let column = data
            .get("submatches")
            .and_then(Value::as_array)
            .and_then(|subs| subs.first())
            .and_then(|sub| sub.get("start"))
            .and_then(Value::as_u64);

        Some(Self {
            file_path,
            line_number,
            line_text,
            column,
        })
    }
}

// =============================================================================
// Per-item test results
// =============================================================================

/// How one candidate log was resolved.
///
/// Exactly one of the search path or the fallback path is populated per
/// outcome; the tag doubles as the wire `status` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestOutcome {
    /// The search backend retrieved the message.
    Found {
        /// Backend response time in milliseconds.
        response_time_ms: f64,
        /// Returned result rows.
        hits: Vec<SearchHit>,
        /// Score of the top hit, when present.
        best_score: Option<f64>,
    },
    /// The backend missed, but the message exists in source code: a false
    /// negative.
    FallbackFound {
        /// File containing the matched line.
        file: String,
        /// 1-based line number of the match.
        line: u64,
        /// The matched source line.
        matched_text: String,
        /// Jaccard similarity between the log message and the line.
        similarity: f64,
    },
    /// Not retrievable and not present in code (dynamic or removed).
    NotFound,
}

/// Result of testing a single candidate log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Original log message.
    pub log_message: String,
    /// Timestamp from the log store.
    pub log_timestamp: String,
    /// Stream labels from the log store.
    #[serde(default)]
    pub stream: BTreeMap<String, String>,
    /// Resolution outcome.
    #[serde(flatten)]
    pub outcome: TestOutcome,
}

impl TestResult {
    /// Result for a log the backend retrieved.
    #[must_use]
    pub fn found(log: &CandidateLog, response: BackendSearchResult) -> Self {
        let best_score = response.best_score();
        Self {
            log_message: log.message.clone(),
            log_timestamp: log.timestamp.clone(),
            stream: log.stream.clone(),
            outcome: TestOutcome::Found {
                response_time_ms: response.response_time_ms,
                hits: response.hits,
                best_score,
            },
        }
    }

    /// Result for a log found only by the code fallback.
    #[must_use]
    pub fn fallback_found(log: &CandidateLog, code_match: &CodeMatch, similarity: f64) -> Self {
        Self {
            log_message: log.message.clone(),
            log_timestamp: log.timestamp.clone(),
            stream: log.stream.clone(),
            outcome: TestOutcome::FallbackFound {
                file: code_match.file_path.clone(),
                line: code_match.line_number,
                matched_text: code_match.line_text.clone(),
                similarity,
            },
        }
    }

    /// Result for a log found nowhere.
    #[must_use]
    pub fn not_found(log: &CandidateLog) -> Self {
        Self {
            log_message: log.message.clone(),
            log_timestamp: log.timestamp.clone(),
            stream: log.stream.clone(),
            outcome: TestOutcome::NotFound,
        }
    }

    /// Wire status string: `found`, `fallback_found`, or `not_found`.
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self.outcome {
            TestOutcome::Found { .. } => "found",
            TestOutcome::FallbackFound { .. } => "fallback_found",
            TestOutcome::NotFound => "not_found",
        }
    }

    /// Whether the backend retrieved this message.
    #[must_use]
    pub const fn search_found(&self) -> bool {
        matches!(self.outcome, TestOutcome::Found { .. })
    }

    /// Whether this is a false negative: verifiably in source code but not
    /// retrievable by the backend. Derivable, equal to
    /// `status == fallback_found` by construction.
    #[must_use]
    pub const fn is_false_negative(&self) -> bool {
        matches!(self.outcome, TestOutcome::FallbackFound { .. })
    }

    /// Backend response time, for search-found results.
    #[must_use]
    pub const fn response_time_ms(&self) -> Option<f64> {
        match self.outcome {
            TestOutcome::Found {
                response_time_ms, ..
            } => Some(response_time_ms),
            _ => None,
        }
    }

    /// Top-hit score, for search-found results.
    #[must_use]
    pub const fn best_score(&self) -> Option<f64> {
        match self.outcome {
            TestOutcome::Found { best_score, .. } => best_score,
            _ => None,
        }
    }

    /// Fallback match detail `(file, line, matched_text, similarity)`.
    #[must_use]
    pub fn fallback_detail(&self) -> Option<(&str, u64, &str, f64)> {
        match &self.outcome {
            TestOutcome::FallbackFound {
                file,
                line,
                matched_text,
                similarity,
            } => Some((file.as_str(), *line, matched_text.as_str(), *similarity)),
            _ => None,
        }
    }
}
