//! Step store trait definition.
//!
//! Defines the storage interface for step checkpoint rows. The infrastructure
//! layer (steadfast-infra) implements this trait with SQLite persistence; any
//! transactional store providing the same guarantees can be substituted.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use std::future::Future;

use steadfast_types::error::StoreError;
use steadfast_types::step::{StepRecord, StepRef};

/// Durable table of step checkpoint rows, keyed by `(workflow_id, step_key)`.
///
/// Implementations must make every mutation atomic and must serialize writes
/// so that concurrent claims from parallel tasks observe committed state.
pub trait StepStore: Send + Sync {
    /// Fetch the current record for a step key, if any.
    fn get_step(
        &self,
        workflow_id: &str,
        step_key: &str,
    ) -> impl Future<Output = Result<Option<StepRecord>, StoreError>> + Send;

    /// Insert a row as `running`, or reset an existing one, stamping the
    /// claiming run and clearing any prior output or error.
    ///
    /// The update half must not fire when the existing row is `completed`:
    /// completion is terminal for a key within a workflow identity.
    fn upsert_running(
        &self,
        workflow_id: &str,
        step: &StepRef,
        run_id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Transition a row to `completed`, storing the serialized output and
    /// clearing the error text.
    fn mark_completed(
        &self,
        workflow_id: &str,
        step_key: &str,
        run_id: &str,
        output_json: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Transition a row to `failed`, storing the failure message and clearing
    /// the output.
    fn mark_failed(
        &self,
        workflow_id: &str,
        step_key: &str,
        run_id: &str,
        error_text: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// All rows for a workflow, ordered by `step_key` ascending.
    fn list_steps(
        &self,
        workflow_id: &str,
    ) -> impl Future<Output = Result<Vec<StepRecord>, StoreError>> + Send;
}
