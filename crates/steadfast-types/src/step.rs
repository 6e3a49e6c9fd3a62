//! Step checkpoint types.
//!
//! A workflow run is a sequence of `step` calls; every call resolves to a
//! durable identity (`StepRef`) and leaves one `StepRecord` row behind in the
//! store. The record is the unit of crash recovery: a later run with the same
//! workflow id replays the same step keys and picks up the persisted state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// StepStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a step checkpoint row.
///
/// Rows are created as `Running` when a step is claimed, then move to
/// `Completed` or `Failed`. `Completed` is terminal for the key within a
/// workflow identity; `Failed` rows are re-claimed into `Running` by a later
/// run, and `Running` rows only change owner through zombie takeover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
    /// Status string this engine does not recognize (row written by a foreign
    /// tool). Never written by the engine; a claim resets such rows.
    #[serde(other)]
    Unknown,
}

impl StepStatus {
    /// The database representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "running" => StepStatus::Running,
            "completed" => StepStatus::Completed,
            "failed" => StepStatus::Failed,
            _ => StepStatus::Unknown,
        })
    }
}

// ---------------------------------------------------------------------------
// StepRef
// ---------------------------------------------------------------------------

/// Durable identity of a single step invocation.
///
/// Produced by the context's sequence counter: `sequence` is the 1-based
/// count of how many times `step_id` has been issued in the current run, and
/// `step_key` is `<step_id>#<sequence>` with the sequence zero-padded to six
/// digits so that `ORDER BY step_key` yields numeric order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRef {
    /// Normalised human label for the step.
    pub step_id: String,
    /// 1-based invocation count of `step_id` within the run.
    pub sequence: u32,
    /// `<step_id>#<zero-padded-sequence>`, the store's key component.
    pub step_key: String,
}

impl StepRef {
    /// Build the ref for the `sequence`-th invocation of `step_id`.
    pub fn new(step_id: impl Into<String>, sequence: u32) -> Self {
        let step_id = step_id.into();
        let step_key = format!("{step_id}#{sequence:06}");
        Self {
            step_id,
            sequence,
            step_key,
        }
    }
}

// ---------------------------------------------------------------------------
// StepRecord
// ---------------------------------------------------------------------------

/// One step checkpoint row, keyed by `(workflow_id, step_key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Caller-supplied workflow instance id, stable across runs.
    pub workflow_id: String,
    /// `<step_id>#<zero-padded-sequence>`.
    pub step_key: String,
    /// Normalised step label.
    pub step_id: String,
    /// 1-based invocation count of `step_id` within the workflow.
    pub sequence: u32,
    /// Current lifecycle state.
    pub status: StepStatus,
    /// Serialized step result when `status` is `Completed`; `None` otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_json: Option<String>,
    /// Last failure message when `status` is `Failed`; `None` otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    /// Run id that last wrote this row.
    pub run_id: String,
    /// RFC 3339 UTC timestamp of the first claim, fixed nanosecond precision.
    pub started_at: String,
    /// RFC 3339 UTC timestamp of the last write, fixed nanosecond precision.
    pub updated_at: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
