//! Test orchestration: bounded-concurrency evaluation of candidate logs.
//!
//! Each candidate runs a three-stage resolution under a semaphore permit:
//! search backend first; on failure or zero hits, the code fallback; then
//! not-found. A single item's failure never aborts the run — stage errors
//! degrade the item's classification only.
//!
//! Completion order under concurrency is nondeterministic, so results are
//! written into a pre-sized array at each item's original index; output
//! ordering always matches input ordering. The checkpoint and all live
//! counters are mutated only from the single consumer loop draining the
//! `JoinSet`, so no locking is needed around them.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::backend::SearchBackend;
use crate::checkpoint::Checkpoint;
use crate::error::{Error, Result};
use crate::fallback::CodeFallback;
use crate::metrics::TestMetrics;
use crate::model::{CandidateLog, TestResult};

// =============================================================================
// Progress reporting
// =============================================================================

/// Live statistics, updated after every completed item.
#[derive(Debug, Clone, Default)]
pub struct RunProgress {
    /// Total candidates in this run.
    pub total: usize,
    /// Items completed so far (including resumed ones).
    pub tested: usize,
    /// Items the backend retrieved.
    pub found_by_search: usize,
    /// Items found only by the code fallback.
    pub found_by_ripgrep: usize,
    /// Items found nowhere.
    pub not_found: usize,
    /// Cumulative backend response time over search-found items.
    pub total_response_time_ms: f64,
}

impl RunProgress {
    fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    fn record(&mut self, result: &TestResult) {
        self.tested += 1;
        match result.response_time_ms() {
            Some(rt) => {
                self.found_by_search += 1;
                self.total_response_time_ms += rt;
            }
            None if result.is_false_negative() => self.found_by_ripgrep += 1,
            None => self.not_found += 1,
        }
    }

    /// Mean backend response time over search-found items so far.
    #[must_use]
    pub fn avg_response_time_ms(&self) -> f64 {
        if self.found_by_search == 0 {
            return 0.0;
        }
        self.total_response_time_ms / self.found_by_search as f64
    }
}

/// Injected progress reporter.
///
/// Kept entirely decoupled from resolution logic so the orchestrator is unit
/// testable headless; the CLI installs a logging reporter.
pub trait ProgressSink: Send + Sync {
    /// Called after each completed item with a stats snapshot.
    fn on_item_complete(&self, progress: &RunProgress);
}

/// Default reporter: discards all progress.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn on_item_complete(&self, _progress: &RunProgress) {}
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Tunables for one test run.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Maximum concurrently in-flight items.
    pub concurrency: usize,
    /// Results requested per backend search.
    pub top_k: usize,
    /// Optional codebase filter passed with every search.
    pub codebase: Option<String>,
    /// Minimum Jaccard similarity for a code match to count as a false
    /// negative.
    pub similarity_threshold: f64,
    /// Maximum fallback matches considered per item.
    pub fallback_max_results: usize,
    /// Persist the checkpoint every N completed items.
    pub checkpoint_every: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            top_k: 5,
            codebase: None,
            similarity_threshold: 0.5,
            fallback_max_results: 10,
            checkpoint_every: 10,
        }
    }
}

/// Everything a completed run produces.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Per-item results in input order.
    pub results: Vec<TestResult>,
    /// Aggregate statistics.
    pub metrics: TestMetrics,
}

/// Drives the per-item resolution pipeline over a batch of candidate logs.
pub struct Orchestrator {
    backend: Arc<dyn SearchBackend>,
    fallback: Arc<dyn CodeFallback>,
    options: OrchestratorOptions,
    progress: Arc<dyn ProgressSink>,
}

impl Orchestrator {
    /// Create an orchestrator over the given collaborators.
    #[must_use]
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        fallback: Arc<dyn CodeFallback>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            backend,
            fallback,
            options,
            progress: Arc::new(NullProgress),
        }
    }

    /// Install a progress reporter.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Test every candidate log, resuming from the checkpoint.
    ///
    /// Indices already recorded in the checkpoint are not re-run; their
    /// stored results are placed directly into the output. The checkpoint is
    /// saved incrementally during the run and once more before returning, so
    /// an interruption loses at most the in-flight window. Deleting the
    /// checkpoint after full success is the caller's decision.
    pub async fn run(
        &self,
        logs: &[CandidateLog],
        checkpoint: &mut Checkpoint,
    ) -> Result<RunOutcome> {
        let start = Instant::now();
        let total = logs.len();

        let mut results: Vec<Option<TestResult>> = vec![None; total];
        let mut progress = RunProgress::new(total);

        for (idx, slot) in results.iter_mut().enumerate() {
            if let Some(result) = checkpoint.get_result(idx) {
                progress.record(result);
                *slot = Some(result.clone());
            }
        }

        let pending: Vec<usize> = (0..total).filter(|&i| results[i].is_none()).collect();
        info!(
            total,
            resumed = total - pending.len(),
            pending = pending.len(),
            concurrency = self.options.concurrency,
            "Starting search quality run"
        );

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        let mut join_set: JoinSet<(usize, TestResult)> = JoinSet::new();

        for idx in pending {
            let log = logs[idx].clone();
            let backend = Arc::clone(&self.backend);
            let fallback = Arc::clone(&self.fallback);
            let semaphore = Arc::clone(&semaphore);
            let options = self.options.clone();
            join_set.spawn(async move {
                let result =
                    test_single_log(&*backend, &*fallback, &options, &semaphore, &log).await;
                (idx, result)
            });
        }

        let mut completed_since_save = 0usize;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, result)) => {
                    progress.record(&result);
                    checkpoint.add_result(idx, result.clone());
                    results[idx] = Some(result);

                    completed_since_save += 1;
                    if completed_since_save >= self.options.checkpoint_every {
                        // Incremental saves are best-effort; the final save
                        // below still gates run completion.
                        if let Err(e) = checkpoint.save() {
                            warn!(error = %e, "Incremental checkpoint save failed");
                        }
                        completed_since_save = 0;
                    }

                    self.progress.on_item_complete(&progress);
                }
                Err(join_err) => {
                    error!(error = %join_err, "Test task aborted before completing");
                }
            }
        }

        checkpoint.save()?;

        let mut final_results = Vec::with_capacity(total);
        for (idx, slot) in results.into_iter().enumerate() {
            match slot {
                Some(result) => final_results.push(result),
                None => {
                    // Only reachable when a task panicked; the checkpoint was
                    // saved above, so the item will be re-attempted on resume.
                    return Err(Error::Runtime(format!(
                        "item {idx} did not complete; resume to re-attempt it"
                    )));
                }
            }
        }

        let metrics = TestMetrics::from_results(&final_results, start.elapsed().as_secs_f64());
        info!(
            total_logs = metrics.total_logs,
            found_by_search = metrics.found_by_search,
            found_by_ripgrep_only = metrics.found_by_ripgrep_only,
            not_found = metrics.not_found,
            hit_rate = format!("{:.3}", metrics.hit_rate),
            duration_seconds = format!("{:.1}", metrics.total_duration_seconds),
            "Run complete"
        );

        Ok(RunOutcome {
            results: final_results,
            metrics,
        })
    }
}

/// Resolve one candidate log.
///
/// Infallible by design: every stage error is caught here and degrades the
/// item to the next stage or to not-found.
async fn test_single_log(
    backend: &dyn SearchBackend,
    fallback: &dyn CodeFallback,
    options: &OrchestratorOptions,
    semaphore: &Semaphore,
    log: &CandidateLog,
) -> TestResult {
    let _permit = match semaphore.acquire().await {
        Ok(permit) => permit,
        Err(_) => {
            // The semaphore outlives every task; closure means shutdown.
            warn!("Concurrency semaphore closed; classifying item as not found");
            return TestResult::not_found(log);
        }
    };

    // 1. Try the search backend.
    match backend
        .search(&log.message, options.top_k, options.codebase.as_deref())
        .await
    {
        Ok(response) if response.total_found > 0 => {
            debug!(
                best_score = ?response.best_score(),
                message = %excerpt(&log.message, 60),
                "Found by search"
            );
            return TestResult::found(log, response);
        }
        Ok(_) => {
            debug!(message = %excerpt(&log.message, 60), "Search returned zero results");
        }
        Err(e) => {
            warn!(
                error = %e,
                message = %excerpt(&log.message, 100),
                "Search failed; degrading to code fallback"
            );
        }
    }

    // 2. Fall back to the source tree.
    let (best_match, similarity) = fallback
        .find_best_match(&log.message, options.fallback_max_results)
        .await;

    if let Some(code_match) = best_match {
        if similarity > options.similarity_threshold {
            warn!(
                file = %code_match.file_path,
                line = code_match.line_number,
                similarity = format!("{similarity:.3}"),
                message = %excerpt(&log.message, 60),
                "False negative: present in code, missed by search"
            );
            return TestResult::fallback_found(log, &code_match, similarity);
        }
        debug!(
            similarity = format!("{similarity:.3}"),
            threshold = options.similarity_threshold,
            "Code match below similarity threshold"
        );
    }

    // 3. Not found anywhere.
    debug!(message = %excerpt(&log.message, 60), "Not found");
    TestResult::not_found(log)
}

/// Character-safe excerpt for log output.
fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
