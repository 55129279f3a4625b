//! Report generation: JSON, Markdown, and CSV artifacts.
//!
//! Renderers are pure functions of `(results, metrics, metadata)` returning
//! the artifact as a `String`; the `write_*` wrappers add the file write.
//! They are independently testable from the same fixed result list.

use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::path::Path;

use chrono::Utc;
use serde_json::Value;
use tracing::info;

use crate::error::{ReportError, Result};
use crate::metrics::TestMetrics;
use crate::model::TestResult;

/// Detail rows shown per section in the Markdown report before truncation.
const MARKDOWN_DETAIL_LIMIT: usize = 20;

/// Maximum characters of a log message carried into a CSV cell.
const CSV_TEXT_LIMIT: usize = 200;

// =============================================================================
// JSON
// =============================================================================

/// Render the full-fidelity JSON dump: metadata, metrics, and every result
/// (with the derived `search_found` / `is_false_negative` flags inlined).
pub fn render_json(
    results: &[TestResult],
    metrics: &TestMetrics,
    metadata: &BTreeMap<String, Value>,
) -> Result<String> {
    let mut meta = metadata.clone();
    meta.insert(
        "generated_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );

    let result_values: Vec<Value> = results
        .iter()
        .map(|result| {
            let mut value = serde_json::to_value(result)?;
            if let Some(obj) = value.as_object_mut() {
                obj.insert("search_found".to_string(), Value::Bool(result.search_found()));
                obj.insert(
                    "is_false_negative".to_string(),
                    Value::Bool(result.is_false_negative()),
                );
            }
            Ok(value)
        })
        .collect::<Result<_>>()?;

    let output = serde_json::json!({
        "metadata": meta,
        "metrics": metrics,
        "results": result_values,
    });

    serde_json::to_string_pretty(&output).map_err(Into::into)
}

/// Render and write the JSON artifact.
pub fn write_json(
    path: &Path,
    results: &[TestResult],
    metrics: &TestMetrics,
    metadata: &BTreeMap<String, Value>,
) -> Result<()> {
    let text = render_json(results, metrics, metadata)?;
    std::fs::write(path, text)?;
    info!(path = %path.display(), "JSON output written");
    Ok(())
}

// =============================================================================
// Markdown
// =============================================================================

/// Render the human-readable Markdown report.
///
/// Section order is fixed: header, configuration, summary table, performance
/// table, quality section, false-negative detail, not-found detail,
/// recommendations.
#[must_use]
pub fn render_markdown(
    results: &[TestResult],
    metrics: &TestMetrics,
    metadata: &BTreeMap<String, Value>,
) -> String {
    let mut out = String::new();

    // Header
    out.push_str("# Search Quality Report\n\n");
    let _ = writeln!(
        out,
        "**Generated**: {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(
        out,
        "**Duration**: {:.1} seconds\n",
        metrics.total_duration_seconds
    );

    // Configuration
    out.push_str("## Configuration\n\n");
    let _ = writeln!(out, "- **Log Store URL**: {}", meta_str(metadata, "log_store_url"));
    let _ = writeln!(out, "- **Search Backend URL**: {}", meta_str(metadata, "search_url"));
    let _ = writeln!(out, "- **Query**: `{}`", meta_str(metadata, "query"));
    let _ = writeln!(
        out,
        "- **Time Range**: {} - {}",
        meta_str(metadata, "start"),
        meta_str(metadata, "end")
    );
    let _ = writeln!(out, "- **Limit**: {} logs", meta_str(metadata, "limit"));
    let _ = writeln!(out, "- **Concurrency**: {}", meta_str(metadata, "concurrency"));
    if let Some(codebase) = metadata.get("codebase").and_then(Value::as_str) {
        let _ = writeln!(out, "- **Codebase Filter**: {codebase}");
    }
    out.push('\n');

    // Summary
    out.push_str("---\n\n## Summary\n\n");
    out.push_str("| Metric | Value |\n|--------|-------|\n");
    let _ = writeln!(out, "| Total Logs Tested | {} |", metrics.total_logs);
    let _ = writeln!(
        out,
        "| Found by Search | {} ({:.1}%) |",
        metrics.found_by_search,
        metrics.hit_rate * 100.0
    );
    let _ = writeln!(
        out,
        "| Found by Ripgrep Only | {} ({:.1}%) |",
        metrics.found_by_ripgrep_only,
        metrics.false_negative_rate * 100.0
    );
    let _ = writeln!(
        out,
        "| Not Found | {} ({:.1}%) |",
        metrics.not_found,
        metrics.miss_rate * 100.0
    );
    out.push('\n');

    // Performance
    out.push_str("## Performance Metrics\n\n");
    out.push_str("| Metric | Value |\n|--------|-------|\n");
    let _ = writeln!(out, "| Average Response Time | {:.1}ms |", metrics.avg_response_time_ms);
    let _ = writeln!(out, "| Median Response Time (P50) | {:.1}ms |", metrics.p50_response_time_ms);
    let _ = writeln!(out, "| 95th Percentile (P95) | {:.1}ms |", metrics.p95_response_time_ms);
    let _ = writeln!(out, "| 99th Percentile (P99) | {:.1}ms |", metrics.p99_response_time_ms);
    let _ = writeln!(out, "| Min Response Time | {:.1}ms |", metrics.min_response_time_ms);
    let _ = writeln!(out, "| Max Response Time | {:.1}ms |", metrics.max_response_time_ms);
    out.push('\n');

    // Quality
    out.push_str("## Search Quality\n\n");
    let _ = writeln!(
        out,
        "- **Hit Rate**: {:.1}% ({})",
        metrics.hit_rate * 100.0,
        if metrics.hit_rate >= 0.8 { "ok" } else { "low" }
    );
    let _ = writeln!(
        out,
        "- **False Negative Rate**: {:.1}% ({})",
        metrics.false_negative_rate * 100.0,
        if metrics.false_negative_rate < 0.1 {
            "ok"
        } else {
            "high"
        }
    );
    if let Some(score) = metrics.avg_match_score {
        let _ = writeln!(out, "- **Average Match Score**: {score:.2}");
    }
    out.push('\n');

    // False negatives (detailed)
    let false_negatives: Vec<&TestResult> =
        results.iter().filter(|r| r.is_false_negative()).collect();
    if !false_negatives.is_empty() {
        out.push_str("---\n\n");
        let _ = writeln!(out, "## False Negatives ({})\n", false_negatives.len());
        out.push_str(
            "These logs exist in source code but weren't found by the search system:\n\n",
        );

        for (i, result) in false_negatives.iter().take(MARKDOWN_DETAIL_LIMIT).enumerate() {
            let _ = writeln!(
                out,
                "### {}. `{}`\n",
                i + 1,
                truncate_chars(&result.log_message, 100)
            );
            if let Some((file, line, matched, similarity)) = result.fallback_detail() {
                let _ = writeln!(out, "- **File**: `{file}:{line}`");
                let _ = writeln!(out, "- **Similarity**: {similarity:.2}");
                let _ = writeln!(out, "- **Code**: `{}`", truncate_chars(matched, 150));
            }
            out.push_str("- **Action**: this log should be indexed\n\n");
        }

        if false_negatives.len() > MARKDOWN_DETAIL_LIMIT {
            let _ = writeln!(
                out,
                "*...and {} more (see JSON output for full list)*\n",
                false_negatives.len() - MARKDOWN_DETAIL_LIMIT
            );
        }
    }

    // Not found logs
    let not_found: Vec<&TestResult> = results
        .iter()
        .filter(|r| r.status() == "not_found")
        .collect();
    if !not_found.is_empty() {
        out.push_str("---\n\n");
        let _ = writeln!(out, "## Not Found Anywhere ({})\n", not_found.len());
        out.push_str(
            "These logs weren't found in search or source code (might be dynamic or removed):\n\n",
        );

        for (i, result) in not_found.iter().take(MARKDOWN_DETAIL_LIMIT).enumerate() {
            let _ = writeln!(
                out,
                "{}. `{}`",
                i + 1,
                truncate_chars(&result.log_message, 150)
            );
        }
        if not_found.len() > MARKDOWN_DETAIL_LIMIT {
            let _ = writeln!(
                out,
                "*...and {} more (see JSON output for full list)*",
                not_found.len() - MARKDOWN_DETAIL_LIMIT
            );
        }
        out.push('\n');
    }

    // Recommendations
    out.push_str("---\n\n## Recommendations\n\n");
    if metrics.hit_rate < 0.7 {
        let _ = writeln!(
            out,
            "1. **Critical**: Hit rate is {:.1}%. Expected >70%. Consider reindexing logs.",
            metrics.hit_rate * 100.0
        );
    } else if metrics.hit_rate < 0.8 {
        let _ = writeln!(
            out,
            "1. **Warning**: Hit rate is {:.1}%. Expected >80%. Some logs may be missing.",
            metrics.hit_rate * 100.0
        );
    } else {
        let _ = writeln!(
            out,
            "1. **Good**: Hit rate is {:.1}%. Search quality is good.",
            metrics.hit_rate * 100.0
        );
    }
    if metrics.false_negative_rate > 0.1 {
        let _ = writeln!(
            out,
            "2. **Index missing logs**: {} logs found by ripgrep should be added to the index.",
            metrics.found_by_ripgrep_only
        );
    }
    if metrics.p99_response_time_ms > 1000.0 {
        let _ = writeln!(
            out,
            "3. **Performance**: P99 response time is {:.0}ms. Consider optimization.",
            metrics.p99_response_time_ms
        );
    }
    if metrics.not_found as f64 > metrics.total_logs as f64 * 0.05 {
        let _ = writeln!(
            out,
            "4. **Review not-found logs**: {} logs ({:.1}%) weren't found anywhere. \
             They might be dynamic or removed from the codebase.",
            metrics.not_found,
            metrics.miss_rate * 100.0
        );
    }
    out.push('\n');

    out.push_str("---\n\n*Generated by logvet*\n");
    out
}

/// Render and write the Markdown report.
pub fn write_markdown(
    path: &Path,
    results: &[TestResult],
    metrics: &TestMetrics,
    metadata: &BTreeMap<String, Value>,
) -> Result<()> {
    std::fs::write(path, render_markdown(results, metrics, metadata))?;
    info!(path = %path.display(), "Markdown report written");
    Ok(())
}

// =============================================================================
// CSV
// =============================================================================

/// Fixed CSV column order.
const CSV_HEADER: &str = "log_message,status,search_found,search_response_time_ms,\
best_match_score,ripgrep_found,ripgrep_file,ripgrep_line,ripgrep_similarity,\
is_false_negative,log_timestamp,stream_labels";

/// Render the CSV artifact: one row per result, fixed 12-column schema,
/// text fields truncated to 200 characters.
pub fn render_csv(results: &[TestResult]) -> Result<String> {
    let mut out = String::new();
    out.push_str(CSV_HEADER);
    out.push('\n');

    for result in results {
        let (file, line, similarity) = match result.fallback_detail() {
            Some((file, line, _, similarity)) => {
                (file.to_string(), line.to_string(), format!("{similarity:.3}"))
            }
            None => (String::new(), String::new(), String::new()),
        };
        let best_score = result
            .best_score()
            .map(|s| format!("{s:.3}"))
            .unwrap_or_default();
        let stream_json = serde_json::to_string(&result.stream)
            .map_err(|e| ReportError::FormatError(e.to_string()))?;

        writeln!(
            out,
            "{},{},{},{:.1},{},{},{},{},{},{},{},{}",
            csv_quote(&truncate_chars(&result.log_message, CSV_TEXT_LIMIT)),
            result.status(),
            result.search_found(),
            result.response_time_ms().unwrap_or(0.0),
            best_score,
            result.is_false_negative(),
            csv_quote(&file),
            line,
            similarity,
            result.is_false_negative(),
            result.log_timestamp,
            csv_quote(&stream_json),
        )
        .map_err(|e| ReportError::FormatError(e.to_string()))?;
    }
    Ok(out)
}

/// Render and write the CSV artifact.
pub fn write_csv(path: &Path, results: &[TestResult]) -> Result<()> {
    let text = render_csv(results)?;
    std::fs::write(path, text)?;
    info!(path = %path.display(), "CSV output written");
    Ok(())
}

/// Quote a CSV field, doubling embedded quotes.
fn csv_quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Character-safe prefix truncation.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

/// Look up a metadata value as display text, defaulting to `N/A`.
fn meta_str(metadata: &BTreeMap<String, Value>, key: &str) -> String {
    metadata.get(key).map_or_else(
        || "N/A".to_string(),
        |v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    )
}
