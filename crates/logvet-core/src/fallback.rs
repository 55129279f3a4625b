//! Code fallback search: finds log messages in source code via ripgrep.
//!
//! When the search backend misses a message, this module decides whether the
//! omission is a genuine index gap or an unindexable dynamic message. The
//! pipeline is keyword extraction (strip dynamic content, tokenize, filter),
//! a conjunctive whole-word ripgrep sweep over code files, and Jaccard
//! similarity scoring to pick the best candidate line.
//!
//! The fallback is advisory: a missing `rg` binary, a subprocess timeout, or
//! a spawn failure all degrade to "no evidence" (empty match list), never to
//! a run-level error.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::BoxFuture;
use crate::error::FallbackError;
use crate::model::CodeMatch;

// =============================================================================
// Keyword extraction
// =============================================================================

// Strip rules are applied in a fixed order to avoid cross-rule interference:
// timestamps before bare dates/times, URLs before path segments, bare
// integers only after epoch values.
static ISO_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T\s]\d{2}:\d{2}:\d{2}(\.\d+)?Z?").unwrap()
});
static EPOCH_VALUE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{10,13}\b").unwrap());
static BARE_DATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap());
static BARE_TIME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{2}:\d{2}:\d{2}").unwrap());
static IPV4: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").unwrap());
static UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}(-[0-9a-f]{4}){3}-[0-9a-f]{12}\b").unwrap()
});
static BARE_INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d+\b").unwrap());
static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());
static PATH_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/[a-zA-Z0-9/_.-]+").unwrap());
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[a-zA-Z_][a-zA-Z0-9_]*\b").unwrap());
static SIMILARITY_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[a-zA-Z]{3,}\b").unwrap());

// CamelCase splitting needs a lookahead to stop an uppercase run before the
// next word ("HTTPServer" -> "HTTP", "Server"), hence fancy-regex.
static CAMEL_PART: LazyLock<fancy_regex::Regex> =
    LazyLock::new(|| fancy_regex::Regex::new(r"[A-Z]?[a-z]+|[A-Z]+(?=[A-Z]|$)").unwrap());

/// Words too common to discriminate between log statements.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "this", "that", "have", "has", "been", "will", "would",
    "could", "should",
];

/// Log level names: present in nearly every log line, useless as keywords.
const LOG_LEVELS: &[&str] = &["info", "warn", "debug", "error", "trace"];

/// Extract searchable keywords from a log message.
///
/// Dynamic content (timestamps, addresses, identifiers, bare numbers, URLs
/// and paths) is stripped first; the remaining text is tokenized into
/// identifier-like words, camelCase tokens are additionally split into
/// sub-words, and the pool is filtered (length >= 3, no stopwords, no log
/// level names), lowercased, and deduplicated preserving first-seen order.
///
/// An empty return means the message is unsearchable and no fallback should
/// be attempted.
#[must_use]
pub fn extract_keywords(message: &str) -> Vec<String> {
    let text = ISO_TIMESTAMP.replace_all(message, "");
    let text = EPOCH_VALUE.replace_all(&text, "");
    let text = BARE_DATE.replace_all(&text, "");
    let text = BARE_TIME.replace_all(&text, "");
    let text = IPV4.replace_all(&text, "");
    let text = UUID.replace_all(&text, "");
    let text = BARE_INTEGER.replace_all(&text, "");
    let text = URL.replace_all(&text, "");
    let text = PATH_SEGMENT.replace_all(&text, "");

    let mut words: Vec<String> = IDENTIFIER
        .find_iter(&text)
        .map(|m| m.as_str().to_string())
        .collect();

    // Append camelCase sub-words after the originals so compound tokens keep
    // their first-seen position.
    let mut camel_parts = Vec::new();
    for word in &words {
        for part in CAMEL_PART.find_iter(word).flatten() {
            camel_parts.push(part.as_str().to_string());
        }
    }
    words.extend(camel_parts);

    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    for word in words {
        let lower = word.to_lowercase();
        if lower.len() < 3 {
            continue;
        }
        if STOPWORDS.contains(&lower.as_str()) || LOG_LEVELS.contains(&lower.as_str()) {
            continue;
        }
        if seen.insert(lower.clone()) {
            keywords.push(lower);
        }
    }
    keywords
}

// =============================================================================
// Pattern construction
// =============================================================================

/// Build the conjunctive search pattern: every keyword must appear as a
/// whole word anywhere in the line, order-independent.
///
/// Example for `["failed", "connect"]`:
/// `(?=.*\bfailed\b)(?=.*\bconnect\b).*`
#[must_use]
pub fn conjunctive_pattern(keywords: &[String]) -> String {
    let mut pattern = String::new();
    for keyword in keywords {
        pattern.push_str("(?=.*\\b");
        pattern.push_str(&regex::escape(keyword));
        pattern.push_str("\\b)");
    }
    pattern.push_str(".*");
    pattern
}

/// Compile the conjunctive pattern in-process.
///
/// Used as a pre-flight check before spawning ripgrep (and by tests to
/// verify conjunction semantics without a subprocess).
pub fn compile_pattern(keywords: &[String]) -> Result<fancy_regex::Regex, FallbackError> {
    let pattern = conjunctive_pattern(keywords);
    fancy_regex::Regex::new(&pattern).map_err(|e| FallbackError::InvalidPattern(e.to_string()))
}

// =============================================================================
// Similarity scoring
// =============================================================================

/// Jaccard similarity of the word sets of two strings.
///
/// Words are runs of at least three letters, lowercased. Returns 0.0 when
/// either set is empty. Symmetric, deterministic, bounded to [0, 1].
#[must_use]
pub fn calculate_similarity(log_message: &str, code_line: &str) -> f64 {
    let log_words = word_set(log_message);
    let code_words = word_set(code_line);

    if log_words.is_empty() || code_words.is_empty() {
        return 0.0;
    }

    let intersection = log_words.intersection(&code_words).count();
    let union = log_words.union(&code_words).count();
    intersection as f64 / union as f64
}

fn word_set(text: &str) -> HashSet<String> {
    let lowered = text.to_lowercase();
    SIMILARITY_WORD
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

// =============================================================================
// Ripgrep invocation
// =============================================================================

/// Source-code extensions searched by the fallback.
const CODE_FILE_TYPES: &str = "code:*.{py,go,js,ts,rb,java,c,cpp,rs}";

/// Code fallback interface consumed by the orchestrator.
pub trait CodeFallback: Send + Sync {
    /// Find the best-matching source line for a log message, returning the
    /// match and its similarity score, or `(None, 0.0)`.
    fn find_best_match<'a>(
        &'a self,
        message: &'a str,
        max_results: usize,
    ) -> BoxFuture<'a, (Option<CodeMatch>, f64)>;
}

/// Ripgrep-backed fallback searcher over a source tree.
pub struct RipgrepSearcher {
    source_path: PathBuf,
    timeout: Duration,
}

impl RipgrepSearcher {
    /// Create a searcher over the given source tree with a 10s per-invocation
    /// timeout.
    #[must_use]
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Override the per-invocation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Search code files for lines containing every keyword.
    ///
    /// Spawns `rg --json` restricted to the code extension allowlist.
    /// `--pcre2` is required because the conjunction uses lookaheads.
    /// Any failure mode (timeout, missing binary, spawn error) returns an
    /// empty list: the fallback never fails the run.
    pub async fn search_in_code(&self, keywords: &[String], max_results: usize) -> Vec<CodeMatch> {
        if keywords.is_empty() {
            debug!("No keywords to search");
            return Vec::new();
        }

        let pattern = match compile_pattern(keywords) {
            Ok(compiled) => compiled.as_str().to_string(),
            Err(e) => {
                warn!(error = %e, ?keywords, "Rejecting unsearchable keyword pattern");
                return Vec::new();
            }
        };

        debug!(
            ?keywords,
            source_path = %self.source_path.display(),
            "Running ripgrep fallback"
        );

        let mut cmd = Command::new("rg");
        cmd.arg("--json")
            .arg("--pcre2")
            .arg("--ignore-case")
            .arg("--max-count")
            .arg(max_results.to_string())
            .arg("--type-add")
            .arg(CODE_FILE_TYPES)
            .arg("--type")
            .arg("code")
            .arg(&pattern)
            .arg(&self.source_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                error!("ripgrep (rg) not found in PATH; code fallback disabled");
                return Vec::new();
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to run ripgrep");
                return Vec::new();
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), ?keywords, "Ripgrep timed out");
                return Vec::new();
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let matches: Vec<CodeMatch> = stdout
            .lines()
            .filter(|line| !line.is_empty())
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter_map(|event| CodeMatch::from_ripgrep_json(&event))
            .collect();

        debug!(match_count = matches.len(), ?keywords, "Ripgrep fallback finished");
        matches
    }

    /// Keyword extraction, code search, and similarity scoring in one step.
    ///
    /// Returns the single candidate with the highest similarity (ties broken
    /// by first-found), or `(None, 0.0)` when no keywords survive extraction
    /// or nothing matches.
    pub async fn best_match(&self, message: &str, max_results: usize) -> (Option<CodeMatch>, f64) {
        let keywords = extract_keywords(message);
        if keywords.is_empty() {
            debug!("No keywords extracted from log message");
            return (None, 0.0);
        }

        let matches = self.search_in_code(&keywords, max_results).await;
        if matches.is_empty() {
            return (None, 0.0);
        }

        let mut best: Option<CodeMatch> = None;
        let mut best_similarity = 0.0_f64;
        for candidate in matches {
            let similarity = calculate_similarity(message, &candidate.line_text);
            if similarity > best_similarity {
                best_similarity = similarity;
                best = Some(candidate);
            }
        }

        debug!(
            similarity = format!("{best_similarity:.3}"),
            file = best.as_ref().map(|m| m.file_path.as_str()),
            "Best fallback match"
        );
        (best, best_similarity)
    }
}

impl CodeFallback for RipgrepSearcher {
    fn find_best_match<'a>(
        &'a self,
        message: &'a str,
        max_results: usize,
    ) -> BoxFuture<'a, (Option<CodeMatch>, f64)> {
        Box::pin(self.best_match(message, max_results))
    }
}
