//! Search backend client: queries the system under test.
//!
//! One deliberate choice here: `total_found` is the count of returned result
//! rows, never a server-reported total. Fallback behavior downstream is
//! driven by observed evidence, not backend self-reporting.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::BoxFuture;
use crate::error::{BackendError, Error, Result};
use crate::model::{BackendSearchResult, CodebaseInfo, SearchHit};
use crate::retry::{RetryPolicy, with_smart_retry};

/// Search backend interface.
///
/// Implemented by the HTTP client below and by in-memory fakes in tests.
pub trait SearchBackend: Send + Sync {
    /// Search for `query`, requesting `top_k` results, optionally filtered
    /// to one codebase.
    fn search<'a>(
        &'a self,
        query: &'a str,
        top_k: usize,
        codebase: Option<&'a str>,
    ) -> BoxFuture<'a, Result<BackendSearchResult>>;

    /// Best-effort reachability probe. Never errors.
    fn health_check<'a>(&'a self) -> BoxFuture<'a, bool>;

    /// List codebases known to the backend. Diagnostics only; never blocks
    /// the core test flow.
    fn list_codebases<'a>(&'a self) -> BoxFuture<'a, Result<Vec<CodebaseInfo>>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponseWire {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct HealthWire {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct CodebasesWire {
    #[serde(default)]
    codebases: Vec<CodebaseInfo>,
}

/// HTTP client for the search backend API.
pub struct SearchBackendClient {
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl SearchBackendClient {
    /// Create a client for the given base URL with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BackendError::Http)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retry: RetryPolicy::search_backend(),
        })
    }

    /// Override the retry policy (tests use a zero-delay policy).
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn search_once(
        &self,
        query: &str,
        top_k: usize,
        codebase: Option<&str>,
    ) -> Result<BackendSearchResult> {
        let url = format!("{}/api/search", self.base_url);

        let mut payload = serde_json::json!({
            "query": query,
            "top_k": top_k,
            "language": "auto",
        });
        if let Some(codebase) = codebase {
            payload["codebase"] = serde_json::Value::String(codebase.to_string());
        }

        debug!(url = %url, query = %excerpt(query, 100), top_k, codebase, "Searching backend");

        // Response time covers the full round trip including body transfer.
        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(BackendError::Http)?;
        let status = response.status();
        let body = response.text().await.map_err(BackendError::Http)?;
        let response_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        if !status.is_success() {
            return Err(Error::Backend(BackendError::Status {
                status: status.as_u16(),
                body: excerpt(&body, 500),
            }));
        }

        let wire: SearchResponseWire = serde_json::from_str(&body)
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        let result = BackendSearchResult::new(wire.results, response_time_ms);
        debug!(
            total_found = result.total_found,
            response_time_ms = format!("{response_time_ms:.1}"),
            "Search completed"
        );
        Ok(result)
    }
}

impl SearchBackend for SearchBackendClient {
    fn search<'a>(
        &'a self,
        query: &'a str,
        top_k: usize,
        codebase: Option<&'a str>,
    ) -> BoxFuture<'a, Result<BackendSearchResult>> {
        Box::pin(async move {
            with_smart_retry(&self.retry, || self.search_once(query, top_k, codebase)).await
        })
    }

    fn health_check<'a>(&'a self) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let url = format!("{}/api/health", self.base_url);
            let response = match self
                .client
                .get(&url)
                .timeout(Duration::from_secs(5))
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Search backend health check failed");
                    return false;
                }
            };
            if !response.status().is_success() {
                warn!(
                    status = response.status().as_u16(),
                    "Search backend health check failed"
                );
                return false;
            }
            match response.json::<HealthWire>().await {
                Ok(health) if health.status.eq_ignore_ascii_case("ok") => {
                    debug!("Search backend health check passed");
                    true
                }
                Ok(health) => {
                    warn!(status = %health.status, "Search backend reported unhealthy status");
                    false
                }
                Err(e) => {
                    warn!(error = %e, "Search backend health response unreadable");
                    false
                }
            }
        })
    }

    fn list_codebases<'a>(&'a self) -> BoxFuture<'a, Result<Vec<CodebaseInfo>>> {
        Box::pin(async move {
            let url = format!("{}/api/codebases", self.base_url);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(BackendError::Http)?;
            let status = response.status();
            let body = response.text().await.map_err(BackendError::Http)?;
            if !status.is_success() {
                return Err(Error::Backend(BackendError::Status {
                    status: status.as_u16(),
                    body: excerpt(&body, 500),
                }));
            }
            let wire: CodebasesWire = serde_json::from_str(&body)
                .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
            debug!(count = wire.codebases.len(), "Listed backend codebases");
            Ok(wire.codebases)
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
