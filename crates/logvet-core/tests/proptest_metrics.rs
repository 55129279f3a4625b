//! Property-based tests for aggregate metrics.
//!
//! Verifies:
//! - count conservation: found + fallback_only + not_found == total
//! - rate conservation: the three rates sum to 1.0 (±1e-9) when total > 0,
//!   and are all 0.0 when total == 0
//! - response-time stats ordering: min <= p50 <= p95 <= p99 <= max
//! - stats computed only over search-found items
//! - serde roundtrip of TestMetrics

use std::collections::BTreeMap;

use proptest::prelude::*;

use logvet_core::metrics::TestMetrics;
use logvet_core::model::{
    BackendSearchResult, CandidateLog, CodeMatch, SearchHit, TestResult,
};

// ────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────

fn candidate(i: usize) -> CandidateLog {
    CandidateLog {
        message: format!("message {i}"),
        timestamp: "2025-11-17T10:30:00Z".into(),
        stream: BTreeMap::new(),
        extra: BTreeMap::new(),
    }
}

#[derive(Debug, Clone)]
enum Shape {
    Found { response_time_ms: f64, score: Option<f64> },
    Fallback { similarity: f64 },
    NotFound,
}

fn arb_shape() -> impl Strategy<Value = Shape> {
    prop_oneof![
        (0.1f64..5_000.0, proptest::option::of(0.0f64..=1.0))
            .prop_map(|(response_time_ms, score)| Shape::Found {
                response_time_ms,
                score
            }),
        (0.51f64..=1.0).prop_map(|similarity| Shape::Fallback { similarity }),
        Just(Shape::NotFound),
    ]
}

fn build(shapes: Vec<Shape>) -> Vec<TestResult> {
    shapes
        .into_iter()
        .enumerate()
        .map(|(i, shape)| {
            let log = candidate(i);
            match shape {
                Shape::Found {
                    response_time_ms,
                    score,
                } => TestResult::found(
                    &log,
                    BackendSearchResult::new(
                        vec![SearchHit {
                            id: None,
                            score,
                            text: Some(log.message.clone()),
                            metadata: None,
                        }],
                        response_time_ms,
                    ),
                ),
                Shape::Fallback { similarity } => TestResult::fallback_found(
                    &log,
                    &CodeMatch {
                        file_path: format!("src/file_{i}.rs"),
                        line_number: i as u64 + 1,
                        line_text: format!("error!(\"message {i}\")"),
                        column: None,
                    },
                    similarity,
                ),
                Shape::NotFound => TestResult::not_found(&log),
            }
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────
// Properties
// ────────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn counts_conserve_total(shapes in proptest::collection::vec(arb_shape(), 0..60)) {
        let results = build(shapes);
        let metrics = TestMetrics::from_results(&results, 1.0);

        prop_assert_eq!(metrics.total_logs, results.len());
        prop_assert_eq!(
            metrics.found_by_search + metrics.found_by_ripgrep_only + metrics.not_found,
            metrics.total_logs
        );
    }

    #[test]
    fn rates_sum_to_one_or_all_zero(shapes in proptest::collection::vec(arb_shape(), 0..60)) {
        let results = build(shapes);
        let metrics = TestMetrics::from_results(&results, 1.0);
        let sum = metrics.hit_rate + metrics.false_negative_rate + metrics.miss_rate;

        if metrics.total_logs > 0 {
            prop_assert!((sum - 1.0).abs() < 1e-9, "rate sum {sum}");
        } else {
            prop_assert!(metrics.hit_rate.abs() < f64::EPSILON);
            prop_assert!(metrics.false_negative_rate.abs() < f64::EPSILON);
            prop_assert!(metrics.miss_rate.abs() < f64::EPSILON);
        }
    }

    #[test]
    fn percentiles_are_ordered(shapes in proptest::collection::vec(arb_shape(), 1..60)) {
        let results = build(shapes);
        let metrics = TestMetrics::from_results(&results, 1.0);

        if metrics.found_by_search > 0 {
            prop_assert!(metrics.min_response_time_ms <= metrics.p50_response_time_ms);
            prop_assert!(metrics.p50_response_time_ms <= metrics.p95_response_time_ms);
            prop_assert!(metrics.p95_response_time_ms <= metrics.p99_response_time_ms);
            prop_assert!(metrics.p99_response_time_ms <= metrics.max_response_time_ms);
            // Tolerance covers summation rounding when many samples coincide
            prop_assert!(metrics.avg_response_time_ms >= metrics.min_response_time_ms - 1e-9);
            prop_assert!(metrics.avg_response_time_ms <= metrics.max_response_time_ms + 1e-9);
        } else {
            prop_assert!(metrics.max_response_time_ms.abs() < f64::EPSILON);
        }
    }

    #[test]
    fn metrics_roundtrip_serde(shapes in proptest::collection::vec(arb_shape(), 0..40)) {
        let results = build(shapes);
        let metrics = TestMetrics::from_results(&results, 2.5);
        let json = serde_json::to_string(&metrics).unwrap();
        let back: TestMetrics = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, metrics);
    }
}
