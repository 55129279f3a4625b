//! Resumable checkpoint persistence for long-running test batches.
//!
//! The checkpoint records which candidate indices have completed and their
//! results, so an interrupted run can resume without re-testing. Saves are
//! atomic (temp file + rename): a subsequent load never observes a torn
//! checkpoint. A missing file and a malformed file are distinct conditions —
//! resume may start fresh on the former, but must refuse to trust the latter.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::CheckpointError;
use crate::model::TestResult;

/// On-disk checkpoint payload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct CheckpointData {
    /// Run configuration metadata (query, limit, total_logs, ...).
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
    /// Indices of completed items.
    #[serde(default)]
    completed_indices: BTreeSet<usize>,
    /// Results per completed index, keyed by the item's original index.
    #[serde(default)]
    partial_results: BTreeMap<usize, TestResult>,
}

/// Durable record of a partially completed run.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
    data: CheckpointData,
}

impl Checkpoint {
    /// Create an empty checkpoint that will persist to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, metadata: BTreeMap<String, Value>) -> Self {
        Self {
            path: path.into(),
            data: CheckpointData {
                metadata,
                ..CheckpointData::default()
            },
        }
    }

    /// Load a checkpoint from disk.
    ///
    /// Fails with [`CheckpointError::NotFound`] when the file is absent and
    /// [`CheckpointError::Malformed`] when it cannot be parsed. A corrupt
    /// checkpoint is fatal by design: it cannot be trusted for resume
    /// decisions.
    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CheckpointError::NotFound(path.display().to_string())
            } else {
                CheckpointError::Malformed(format!("unreadable checkpoint: {e}"))
            }
        })?;

        let data: CheckpointData = serde_json::from_str(&text)
            .map_err(|e| CheckpointError::Malformed(e.to_string()))?;

        info!(
            completed = data.completed_indices.len(),
            path = %path.display(),
            "Checkpoint loaded"
        );
        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    /// Record a completed item.
    pub fn add_result(&mut self, index: usize, result: TestResult) {
        self.data.completed_indices.insert(index);
        self.data.partial_results.insert(index, result);
    }

    /// Whether an index has already been tested.
    #[must_use]
    pub fn is_completed(&self, index: usize) -> bool {
        self.data.completed_indices.contains(&index)
    }

    /// Alias for [`Self::is_completed`], reading like set membership.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.is_completed(index)
    }

    /// Result recorded for an index, if any.
    #[must_use]
    pub fn get_result(&self, index: usize) -> Option<&TestResult> {
        self.data.partial_results.get(&index)
    }

    /// Run metadata recorded at creation.
    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.data.metadata
    }

    /// Number of completed items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.completed_indices.len()
    }

    /// Whether no items have completed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.completed_indices.is_empty()
    }

    /// Completion fraction in [0, 1], based on the `total_logs` metadata
    /// entry (0.0 when unknown).
    #[must_use]
    pub fn progress(&self) -> f64 {
        let total = self
            .data
            .metadata
            .get("total_logs")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if total == 0 {
            return 0.0;
        }
        self.len() as f64 / total as f64
    }

    /// Persist the checkpoint atomically.
    ///
    /// Writes to a sibling temp file, then renames over the checkpoint path,
    /// so a crash mid-save leaves the previous checkpoint intact.
    pub fn save(&self) -> Result<(), CheckpointError> {
        let json = serde_json::to_string_pretty(&self.data)
            .map_err(|e| CheckpointError::Write(e.to_string()))?;

        let tmp_path = temp_sibling(&self.path);
        std::fs::write(&tmp_path, json).map_err(|e| {
            CheckpointError::Write(format!("{}: {e}", tmp_path.display()))
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            CheckpointError::Write(format!("{}: {e}", self.path.display()))
        })?;

        debug!(
            completed = self.len(),
            path = %self.path.display(),
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Delete the checkpoint file.
    ///
    /// A no-op when the file is already gone. Call only after a fully
    /// successful run: after a failure the file stays behind, forcing an
    /// explicit resume decision on the next run.
    pub fn delete(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Checkpoint deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, path = %self.path.display(), "Failed to delete checkpoint"),
        }
    }
}

/// Temp path next to the checkpoint so the final rename stays on one
/// filesystem.
fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map_or_else(
        || std::ffi::OsString::from("checkpoint"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CandidateLog, CodeMatch};

    fn sample_result(msg: &str) -> TestResult {
        let log = CandidateLog {
            message: msg.into(),
            timestamp: "2025-11-17T10:30:00Z".into(),
            stream: BTreeMap::from([("namespace".to_string(), "app".to_string())]),
            extra: BTreeMap::new(),
        };
        TestResult::fallback_found(
            &log,
            &CodeMatch {
                file_path: "src/db.rs".into(),
                line_number: 42,
                line_text: "error!(\"boom\")".into(),
                column: Some(4),
            },
            0.62,
        )
    }

    #[test]
    fn round_trip_preserves_indices_and_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let mut checkpoint = Checkpoint::new(
            &path,
            BTreeMap::from([("total_logs".to_string(), serde_json::json!(10))]),
        );
        checkpoint.add_result(0, sample_result("first"));
        checkpoint.add_result(3, sample_result("second"));
        checkpoint.save().unwrap();

        let loaded = Checkpoint::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.is_completed(0));
        assert!(loaded.is_completed(3));
        assert!(!loaded.is_completed(1));
        assert_eq!(loaded.get_result(0), checkpoint.get_result(0));
        assert_eq!(loaded.get_result(3), checkpoint.get_result(3));
        assert_eq!(loaded.metadata(), checkpoint.metadata());
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Checkpoint::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[test]
    fn load_malformed_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{truncated").unwrap();
        let err = Checkpoint::load(&path).unwrap_err();
        assert!(matches!(err, CheckpointError::Malformed(_)));
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let checkpoint = Checkpoint::new(&path, BTreeMap::new());
        checkpoint.save().unwrap();

        assert!(path.exists());
        assert!(!temp_sibling(&path).exists());
    }

    #[test]
    fn save_overwrites_previous_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let mut checkpoint = Checkpoint::new(&path, BTreeMap::new());
        checkpoint.add_result(0, sample_result("first"));
        checkpoint.save().unwrap();
        checkpoint.add_result(1, sample_result("second"));
        checkpoint.save().unwrap();

        let loaded = Checkpoint::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let checkpoint = Checkpoint::new(&path, BTreeMap::new());
        checkpoint.save().unwrap();

        checkpoint.delete();
        assert!(!path.exists());
        // Second delete on a missing file is a quiet no-op
        checkpoint.delete();
    }

    #[test]
    fn progress_uses_total_logs_metadata() {
        let mut checkpoint = Checkpoint::new(
            "unused.json",
            BTreeMap::from([("total_logs".to_string(), serde_json::json!(4))]),
        );
        assert!(checkpoint.progress().abs() < f64::EPSILON);
        checkpoint.add_result(0, sample_result("a"));
        checkpoint.add_result(1, sample_result("b"));
        assert!((checkpoint.progress() - 0.5).abs() < f64::EPSILON);

        let no_total = Checkpoint::new("unused.json", BTreeMap::new());
        assert!(no_total.progress().abs() < f64::EPSILON);
    }

    #[test]
    fn wire_format_uses_string_indexed_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let mut checkpoint = Checkpoint::new(&path, BTreeMap::new());
        checkpoint.add_result(7, sample_result("seventh"));
        checkpoint.save().unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["partial_results"]["7"].is_object());
        assert_eq!(raw["completed_indices"], serde_json::json!([7]));
        assert_eq!(raw["partial_results"]["7"]["status"], "fallback_found");
    }
}
