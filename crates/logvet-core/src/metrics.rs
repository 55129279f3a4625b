//! Aggregate metrics over a completed test run.
//!
//! Rates are derived from mutually exclusive status counts, so
//! `hit_rate + false_negative_rate + miss_rate == 1.0` (within floating
//! tolerance) whenever at least one log was tested. Response-time statistics
//! are computed only over items the search backend actually answered.

use serde::{Deserialize, Serialize};

use crate::model::TestResult;

/// Aggregated metrics from a test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMetrics {
    /// Total number of logs tested.
    pub total_logs: usize,

    /// Logs the search backend retrieved.
    pub found_by_search: usize,
    /// Logs found only by the code fallback (false negatives).
    pub found_by_ripgrep_only: usize,
    /// Logs found nowhere.
    pub not_found: usize,

    /// Fraction found by search (0.0 when nothing was tested).
    pub hit_rate: f64,
    /// Fraction found only by the fallback.
    pub false_negative_rate: f64,
    /// Fraction found nowhere.
    pub miss_rate: f64,

    /// Mean backend response time over search-found items.
    pub avg_response_time_ms: f64,
    /// Fastest backend response among search-found items.
    pub min_response_time_ms: f64,
    /// Slowest backend response among search-found items.
    pub max_response_time_ms: f64,
    /// Median backend response time (interpolated for even counts).
    pub p50_response_time_ms: f64,
    /// 95th percentile response time (nearest-rank).
    pub p95_response_time_ms: f64,
    /// 99th percentile response time (nearest-rank).
    pub p99_response_time_ms: f64,

    /// Mean top-hit score over results that carry one.
    pub avg_match_score: Option<f64>,
    /// Wall-clock duration of the whole run in seconds.
    pub total_duration_seconds: f64,
}

impl TestMetrics {
    /// Reduce per-item results into aggregate statistics.
    #[must_use]
    pub fn from_results(results: &[TestResult], total_duration_seconds: f64) -> Self {
        let total = results.len();
        let found_by_search = results.iter().filter(|r| r.search_found()).count();
        let found_by_ripgrep_only = results.iter().filter(|r| r.is_false_negative()).count();
        let not_found = results.iter().filter(|r| r.status() == "not_found").count();

        let mut response_times: Vec<f64> =
            results.iter().filter_map(TestResult::response_time_ms).collect();
        response_times.sort_by(f64::total_cmp);

        let (avg, min, max, p50, p95, p99) = if response_times.is_empty() {
            (0.0, 0.0, 0.0, 0.0, 0.0, 0.0)
        } else {
            let sum: f64 = response_times.iter().sum();
            (
                sum / response_times.len() as f64,
                response_times[0],
                response_times[response_times.len() - 1],
                median_sorted(&response_times),
                percentile_sorted(&response_times, 0.95),
                percentile_sorted(&response_times, 0.99),
            )
        };

        let match_scores: Vec<f64> = results.iter().filter_map(TestResult::best_score).collect();
        let avg_match_score = if match_scores.is_empty() {
            None
        } else {
            Some(match_scores.iter().sum::<f64>() / match_scores.len() as f64)
        };

        let rate = |count: usize| {
            if total > 0 {
                count as f64 / total as f64
            } else {
                0.0
            }
        };

        Self {
            total_logs: total,
            found_by_search,
            found_by_ripgrep_only,
            not_found,
            hit_rate: rate(found_by_search),
            false_negative_rate: rate(found_by_ripgrep_only),
            miss_rate: rate(not_found),
            avg_response_time_ms: avg,
            min_response_time_ms: min,
            max_response_time_ms: max,
            p50_response_time_ms: p50,
            p95_response_time_ms: p95,
            p99_response_time_ms: p99,
            avg_match_score,
            total_duration_seconds,
        }
    }
}

/// Interpolated median of an ascending-sorted slice.
fn median_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Nearest-rank percentile of an ascending-sorted slice:
/// `index = floor(len * percentile)`, clamped to the last element.
fn percentile_sorted(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = (sorted.len() as f64 * percentile) as usize;
    sorted[index.min(sorted.len() - 1)]
}
