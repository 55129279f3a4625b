//! Integration tests for the resolution pipeline: fake collaborators, no
//! network, no subprocesses.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use logvet_core::BoxFuture;
use logvet_core::backend::SearchBackend;
use logvet_core::checkpoint::Checkpoint;
use logvet_core::error::{BackendError, Error, Result};
use logvet_core::fallback::CodeFallback;
use logvet_core::model::{
    BackendSearchResult, CandidateLog, CodeMatch, CodebaseInfo, SearchHit,
};
use logvet_core::orchestrator::{Orchestrator, OrchestratorOptions};

use std::sync::Arc;

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct FakeBackend {
    /// Messages the backend "indexes": these return one scored hit.
    indexed: HashSet<String>,
    /// Messages whose searches fail with HTTP 500.
    failing: HashSet<String>,
    /// Per-search delay, to exercise concurrency.
    delay: Duration,
    /// Concurrency observation.
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Every query received, in arrival order.
    searched: Mutex<Vec<String>>,
}

impl FakeBackend {
    fn indexing<I: IntoIterator<Item = &'static str>>(messages: I) -> Self {
        Self {
            indexed: messages.into_iter().map(String::from).collect(),
            ..Self::default()
        }
    }

    fn searched(&self) -> Vec<String> {
        self.searched.lock().unwrap().clone()
    }
}

impl SearchBackend for FakeBackend {
    fn search<'a>(
        &'a self,
        query: &'a str,
        _top_k: usize,
        _codebase: Option<&'a str>,
    ) -> BoxFuture<'a, Result<BackendSearchResult>> {
        Box::pin(async move {
            self.searched.lock().unwrap().push(query.to_string());

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(query) {
                return Err(Error::Backend(BackendError::Status {
                    status: 500,
                    body: "backend exploded".into(),
                }));
            }

            let hits = if self.indexed.contains(query) {
                vec![SearchHit {
                    id: None,
                    score: Some(0.91),
                    text: Some(query.to_string()),
                    metadata: None,
                }]
            } else {
                Vec::new()
            };
            Ok(BackendSearchResult::new(hits, 10.0))
        })
    }

    fn health_check<'a>(&'a self) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }

    fn list_codebases<'a>(&'a self) -> BoxFuture<'a, Result<Vec<CodebaseInfo>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

#[derive(Default)]
struct FakeFallback {
    /// Message -> (match, similarity) returned by the code sweep.
    matches: HashMap<String, (CodeMatch, f64)>,
    calls: AtomicUsize,
}

impl FakeFallback {
    fn with_match(message: &str, similarity: f64) -> Self {
        let mut matches = HashMap::new();
        matches.insert(
            message.to_string(),
            (
                CodeMatch {
                    file_path: "src/db.rs".into(),
                    line_number: 156,
                    line_text: format!("error!(\"{message}\")"),
                    column: Some(4),
                },
                similarity,
            ),
        );
        Self {
            matches,
            calls: AtomicUsize::new(0),
        }
    }
}

impl CodeFallback for FakeFallback {
    fn find_best_match<'a>(
        &'a self,
        message: &'a str,
        _max_results: usize,
    ) -> BoxFuture<'a, (Option<CodeMatch>, f64)> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.matches
                .get(message)
                .map_or((None, 0.0), |(m, s)| (Some(m.clone()), *s))
        })
    }
}

fn candidate(message: &str) -> CandidateLog {
    CandidateLog {
        message: message.into(),
        timestamp: "2025-11-17T10:30:00Z".into(),
        stream: BTreeMap::from([("namespace".to_string(), "app".to_string())]),
        extra: BTreeMap::new(),
    }
}

fn checkpoint_in(dir: &tempfile::TempDir) -> Checkpoint {
    Checkpoint::new(dir.path().join("checkpoint.json"), BTreeMap::new())
}

// =============================================================================
// Resolution policy
// =============================================================================

#[tokio::test]
async fn indexed_message_resolves_as_found() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::indexing(["db connected"]));
    let fallback = Arc::new(FakeFallback::default());
    let orchestrator = Orchestrator::new(
        backend,
        Arc::clone(&fallback) as Arc<dyn CodeFallback>,
        OrchestratorOptions::default(),
    );

    let logs = vec![candidate("db connected")];
    let mut checkpoint = checkpoint_in(&dir);
    let outcome = orchestrator.run(&logs, &mut checkpoint).await.unwrap();

    assert_eq!(outcome.results[0].status(), "found");
    assert!(!outcome.results[0].is_false_negative());
    assert_eq!(outcome.results[0].best_score(), Some(0.91));
    // The fallback is never consulted for a backend hit
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.metrics.found_by_search, 1);
}

#[tokio::test]
async fn zero_results_with_code_evidence_is_false_negative() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::default());
    let fallback = Arc::new(FakeFallback::with_match("db timeout", 0.62));
    let orchestrator = Orchestrator::new(backend, fallback, OrchestratorOptions::default());

    let logs = vec![candidate("db timeout")];
    let mut checkpoint = checkpoint_in(&dir);
    let outcome = orchestrator.run(&logs, &mut checkpoint).await.unwrap();

    let result = &outcome.results[0];
    assert_eq!(result.status(), "fallback_found");
    assert!(result.is_false_negative());
    let (file, line, _, similarity) = result.fallback_detail().unwrap();
    assert_eq!(file, "src/db.rs");
    assert_eq!(line, 156);
    assert!((similarity - 0.62).abs() < f64::EPSILON);
    assert_eq!(outcome.metrics.found_by_ripgrep_only, 1);
}

#[tokio::test]
async fn zero_results_without_evidence_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::default());
    let fallback = Arc::new(FakeFallback::default());
    let orchestrator = Orchestrator::new(backend, fallback, OrchestratorOptions::default());

    let logs = vec![candidate("ephemeral message 123abc")];
    let mut checkpoint = checkpoint_in(&dir);
    let outcome = orchestrator.run(&logs, &mut checkpoint).await.unwrap();

    assert_eq!(outcome.results[0].status(), "not_found");
    assert!(!outcome.results[0].is_false_negative());
    assert_eq!(outcome.metrics.not_found, 1);
}

#[tokio::test]
async fn search_failure_degrades_to_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend {
        failing: HashSet::from(["db timeout".to_string()]),
        ..FakeBackend::default()
    });
    let fallback = Arc::new(FakeFallback::with_match("db timeout", 0.8));
    let orchestrator = Orchestrator::new(backend, fallback, OrchestratorOptions::default());

    let logs = vec![candidate("db timeout")];
    let mut checkpoint = checkpoint_in(&dir);
    let outcome = orchestrator.run(&logs, &mut checkpoint).await.unwrap();

    // The stage error degraded the item, it did not abort the run
    assert_eq!(outcome.results[0].status(), "fallback_found");
}

#[tokio::test]
async fn similarity_at_threshold_is_not_evidence() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::default());
    // Exactly at the 0.5 threshold: strict comparison keeps this a miss
    let fallback = Arc::new(FakeFallback::with_match("borderline", 0.5));
    let orchestrator = Orchestrator::new(backend, fallback, OrchestratorOptions::default());

    let logs = vec![candidate("borderline")];
    let mut checkpoint = checkpoint_in(&dir);
    let outcome = orchestrator.run(&logs, &mut checkpoint).await.unwrap();

    assert_eq!(outcome.results[0].status(), "not_found");
}

#[tokio::test]
async fn threshold_is_configurable() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::default());
    let fallback = Arc::new(FakeFallback::with_match("weak match", 0.4));
    let options = OrchestratorOptions {
        similarity_threshold: 0.3,
        ..OrchestratorOptions::default()
    };
    let orchestrator = Orchestrator::new(backend, fallback, options);

    let logs = vec![candidate("weak match")];
    let mut checkpoint = checkpoint_in(&dir);
    let outcome = orchestrator.run(&logs, &mut checkpoint).await.unwrap();

    assert_eq!(outcome.results[0].status(), "fallback_found");
}

// =============================================================================
// Ordering, concurrency, resume
// =============================================================================

#[tokio::test]
async fn results_keep_input_order_under_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend {
        indexed: (0..12).map(|i| format!("message {i}")).collect(),
        delay: Duration::from_millis(3),
        ..FakeBackend::default()
    });
    let fallback = Arc::new(FakeFallback::default());
    let options = OrchestratorOptions {
        concurrency: 4,
        ..OrchestratorOptions::default()
    };
    let orchestrator = Orchestrator::new(backend, fallback, options);

    let logs: Vec<CandidateLog> = (0..12).map(|i| candidate(&format!("message {i}"))).collect();
    let mut checkpoint = checkpoint_in(&dir);
    let outcome = orchestrator.run(&logs, &mut checkpoint).await.unwrap();

    assert_eq!(outcome.results.len(), logs.len());
    for (i, result) in outcome.results.iter().enumerate() {
        assert_eq!(result.log_message, format!("message {i}"));
    }
}

#[tokio::test]
async fn in_flight_searches_never_exceed_semaphore_size() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend {
        delay: Duration::from_millis(10),
        ..FakeBackend::default()
    });
    let fallback = Arc::new(FakeFallback::default());
    let options = OrchestratorOptions {
        concurrency: 3,
        ..OrchestratorOptions::default()
    };
    let orchestrator = Orchestrator::new(
        Arc::clone(&backend) as Arc<dyn SearchBackend>,
        fallback,
        options,
    );

    let logs: Vec<CandidateLog> = (0..20).map(|i| candidate(&format!("burst {i}"))).collect();
    let mut checkpoint = checkpoint_in(&dir);
    orchestrator.run(&logs, &mut checkpoint).await.unwrap();

    let observed = backend.max_in_flight.load(Ordering::SeqCst);
    assert!(observed <= 3, "observed {observed} concurrent searches");
    assert!(observed >= 2, "concurrency was never exercised");
}

#[tokio::test]
async fn resume_skips_completed_indices() {
    let dir = tempfile::tempdir().unwrap();
    let logs: Vec<CandidateLog> = (0..10).map(|i| candidate(&format!("log {i}"))).collect();

    // A previous run completed indices 0 and 3.
    let mut checkpoint = checkpoint_in(&dir);
    checkpoint.add_result(
        0,
        TestResultFixture::found_for(&logs[0]),
    );
    checkpoint.add_result(3, TestResultFixture::found_for(&logs[3]));
    checkpoint.save().unwrap();

    let backend = Arc::new(FakeBackend::default());
    let fallback = Arc::new(FakeFallback::default());
    let orchestrator = Orchestrator::new(
        Arc::clone(&backend) as Arc<dyn SearchBackend>,
        fallback,
        OrchestratorOptions::default(),
    );

    let mut resumed = Checkpoint::load(&dir.path().join("checkpoint.json")).unwrap();
    let outcome = orchestrator.run(&logs, &mut resumed).await.unwrap();

    // Only the eight pending indices hit the backend
    let searched = backend.searched();
    assert_eq!(searched.len(), 8);
    assert!(!searched.contains(&"log 0".to_string()));
    assert!(!searched.contains(&"log 3".to_string()));

    // Resumed slots carry the stored results; ordering is intact
    assert_eq!(outcome.results.len(), 10);
    assert_eq!(outcome.results[0].status(), "found");
    assert_eq!(outcome.results[0].log_message, "log 0");
    for (i, result) in outcome.results.iter().enumerate() {
        assert_eq!(result.log_message, format!("log {i}"));
    }
    assert_eq!(outcome.metrics.total_logs, 10);
}

#[tokio::test]
async fn checkpoint_contains_every_result_after_run() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::indexing(["log 0", "log 2"]));
    let fallback = Arc::new(FakeFallback::default());
    let options = OrchestratorOptions {
        checkpoint_every: 1,
        ..OrchestratorOptions::default()
    };
    let orchestrator = Orchestrator::new(backend, fallback, options);

    let logs: Vec<CandidateLog> = (0..4).map(|i| candidate(&format!("log {i}"))).collect();
    let mut checkpoint = checkpoint_in(&dir);
    orchestrator.run(&logs, &mut checkpoint).await.unwrap();

    let reloaded = Checkpoint::load(&dir.path().join("checkpoint.json")).unwrap();
    assert_eq!(reloaded.len(), 4);
    for i in 0..4 {
        assert!(reloaded.is_completed(i), "index {i} missing");
    }
    assert_eq!(reloaded.get_result(0).unwrap().status(), "found");
    assert_eq!(reloaded.get_result(1).unwrap().status(), "not_found");
}

/// Helper for building checkpoint fixtures without a live backend.
struct TestResultFixture;

impl TestResultFixture {
    fn found_for(log: &CandidateLog) -> logvet_core::model::TestResult {
        logvet_core::model::TestResult::found(
            log,
            BackendSearchResult::new(
                vec![SearchHit {
                    id: None,
                    score: Some(0.9),
                    text: Some(log.message.clone()),
                    metadata: None,
                }],
                15.0,
            ),
        )
    }
}
