//! Log store client: fetches ground-truth candidate logs.
//!
//! The log store is queried once per run for a bounded window of candidate
//! log lines. Its query language is opaque to logvet; the string is passed
//! through verbatim. Responses are newline-delimited JSON, and individual
//! malformed lines are skipped with a warning rather than failing the fetch
//! (partial results are acceptable ground truth).

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::BoxFuture;
use crate::error::{Error, LogStoreError, Result};
use crate::model::CandidateLog;
use crate::retry::{RetryPolicy, with_smart_retry};

/// Ground-truth log source interface.
///
/// Implemented by the HTTP client below and by in-memory fakes in tests.
pub trait LogSource: Send + Sync {
    /// Fetch up to `limit` candidate logs matching `query` within
    /// `[start, end]` (RFC3339 bounds).
    fn query_logs<'a>(
        &'a self,
        query: &'a str,
        start: &'a str,
        end: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<CandidateLog>>>;

    /// Best-effort reachability probe. Never errors.
    fn health_check<'a>(&'a self) -> BoxFuture<'a, bool>;
}

/// HTTP client for the log store's LogsQL-style query API.
pub struct LogStoreClient {
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl LogStoreClient {
    /// Create a client for the given base URL with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LogStoreError::Http)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retry: RetryPolicy::log_store(),
        })
    }

    /// Override the retry policy (tests use a zero-delay policy).
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_page(
        &self,
        query: &str,
        start: &str,
        end: &str,
        limit: usize,
    ) -> Result<String> {
        let url = format!("{}/select/logsql/query", self.base_url);
        debug!(url = %url, query = %excerpt(query, 100), start, end, limit, "Querying log store");

        let limit_param = limit.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", query),
                ("start", start),
                ("end", end),
                ("limit", limit_param.as_str()),
            ])
            .send()
            .await
            .map_err(LogStoreError::Http)?;

        let status = response.status();
        let body = response.text().await.map_err(LogStoreError::Http)?;
        if !status.is_success() {
            return Err(Error::LogStore(LogStoreError::Status {
                status: status.as_u16(),
                body: excerpt(&body, 500),
            }));
        }
        Ok(body)
    }

    /// Parse a newline-delimited JSON body into candidate logs, skipping
    /// malformed lines.
    fn parse_jsonl(body: &str) -> Vec<CandidateLog> {
        let mut logs = Vec::new();
        for (line_num, line) in body.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<serde_json::Value>(line) {
                Ok(data) => logs.push(CandidateLog::from_json(&data)),
                Err(e) => {
                    warn!(
                        line_number = line_num + 1,
                        error = %e,
                        line = %excerpt(line, 200),
                        "Skipping malformed log store line"
                    );
                }
            }
        }
        logs
    }
}

impl LogSource for LogStoreClient {
    fn query_logs<'a>(
        &'a self,
        query: &'a str,
        start: &'a str,
        end: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<CandidateLog>>> {
        Box::pin(async move {
            let body = with_smart_retry(&self.retry, || {
                self.fetch_page(query, start, end, limit)
            })
            .await?;

            let logs = Self::parse_jsonl(&body);
            info!(
                count = logs.len(),
                limit,
                query = %excerpt(query, 100),
                "Fetched candidate logs"
            );
            Ok(logs)
        })
    }

    fn health_check<'a>(&'a self) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let url = format!("{}/health", self.base_url);
            match self
                .client
                .get(&url)
                .timeout(Duration::from_secs(5))
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    debug!("Log store health check passed");
                    true
                }
                Ok(response) => {
                    warn!(status = response.status().as_u16(), "Log store health check failed");
                    false
                }
                Err(e) => {
                    warn!(error = %e, "Log store health check failed");
                    false
                }
            }
        })
    }
}

/// Character-safe excerpt for log output.
fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_jsonl_skips_bad_lines() {
        let body = concat!(
            "{\"_msg\": \"first\", \"_time\": \"2025-11-17T00:00:01Z\", \"_stream\": {}}\n",
            "this is not json\n",
            "\n",
            "{\"_msg\": \"second\", \"_time\": \"2025-11-17T00:00:02Z\", \"_stream\": {}}\n",
        );
        let logs = LogStoreClient::parse_jsonl(body);
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "first");
        assert_eq!(logs[1].message, "second");
    }

    #[test]
    fn parse_jsonl_empty_body_yields_no_logs() {
        assert!(LogStoreClient::parse_jsonl("").is_empty());
        assert!(LogStoreClient::parse_jsonl("\n\n").is_empty());
    }

    #[test]
    fn excerpt_is_char_safe() {
        assert_eq!(excerpt("héllo wörld", 5), "héllo");
        assert_eq!(excerpt("short", 100), "short");
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let client = LogStoreClient::new("http://localhost:9428/", Duration::from_secs(30))
            .expect("client builds");
        assert_eq!(client.base_url, "http://localhost:9428");
    }
}
