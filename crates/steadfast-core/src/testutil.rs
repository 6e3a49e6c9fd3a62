//! In-memory `StepStore` backing the engine's unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{SecondsFormat, Utc};

use steadfast_types::error::StoreError;
use steadfast_types::step::{StepRecord, StepRef, StepStatus};

use crate::repository::StepStore;

type Key = (String, String);

/// HashMap-backed store honoring the `StepStore` contract, with hooks for
/// injecting corruption and write failures.
#[derive(Default)]
pub(crate) struct MemoryStore {
    rows: Mutex<HashMap<Key, StepRecord>>,
    fail_completions: AtomicBool,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `mark_completed` fail (or succeed again).
    pub(crate) fn fail_completions(&self, fail: bool) {
        self.fail_completions.store(fail, Ordering::SeqCst);
    }

    /// Overwrite a completed row's payload with text that does not decode.
    pub(crate) fn corrupt_output(&self, workflow_id: &str, step_key: &str) {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(&key(workflow_id, step_key))
            .expect("row to corrupt must exist");
        row.output_json = Some("not-json".to_string());
    }

    /// Overwrite a row's `updated_at` with an unparseable timestamp.
    pub(crate) fn corrupt_updated_at(&self, workflow_id: &str, step_key: &str) {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(&key(workflow_id, step_key))
            .expect("row to corrupt must exist");
        row.updated_at = "not-a-timestamp".to_string();
    }

    /// Force a row's status, simulating a row written by a foreign tool.
    pub(crate) fn set_status(&self, workflow_id: &str, step_key: &str, status: StepStatus) {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(&key(workflow_id, step_key))
            .expect("row to mutate must exist");
        row.status = status;
    }
}

fn key(workflow_id: &str, step_key: &str) -> Key {
    (workflow_id.to_string(), step_key.to_string())
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl StepStore for MemoryStore {
    async fn get_step(
        &self,
        workflow_id: &str,
        step_key: &str,
    ) -> Result<Option<StepRecord>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&key(workflow_id, step_key))
            .cloned())
    }

    async fn upsert_running(
        &self,
        workflow_id: &str,
        step: &StepRef,
        run_id: &str,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let key = key(workflow_id, &step.step_key);
        if rows
            .get(&key)
            .is_some_and(|row| row.status == StepStatus::Completed)
        {
            return Ok(());
        }
        let ts = now();
        rows.insert(
            key,
            StepRecord {
                workflow_id: workflow_id.to_string(),
                step_key: step.step_key.clone(),
                step_id: step.step_id.clone(),
                sequence: step.sequence,
                status: StepStatus::Running,
                output_json: None,
                error_text: None,
                run_id: run_id.to_string(),
                started_at: ts.clone(),
                updated_at: ts,
            },
        );
        Ok(())
    }

    async fn mark_completed(
        &self,
        workflow_id: &str,
        step_key: &str,
        run_id: &str,
        output_json: &str,
    ) -> Result<(), StoreError> {
        if self.fail_completions.load(Ordering::SeqCst) {
            return Err(StoreError::Query("injected completion failure".to_string()));
        }
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(&key(workflow_id, step_key))
            .ok_or(StoreError::NotFound)?;
        row.status = StepStatus::Completed;
        row.output_json = Some(output_json.to_string());
        row.error_text = None;
        row.run_id = run_id.to_string();
        row.updated_at = now();
        Ok(())
    }

    async fn mark_failed(
        &self,
        workflow_id: &str,
        step_key: &str,
        run_id: &str,
        error_text: &str,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(&key(workflow_id, step_key))
            .ok_or(StoreError::NotFound)?;
        row.status = StepStatus::Failed;
        row.output_json = None;
        row.error_text = Some(error_text.to_string());
        row.run_id = run_id.to_string();
        row.updated_at = now();
        Ok(())
    }

    async fn list_steps(&self, workflow_id: &str) -> Result<Vec<StepRecord>, StoreError> {
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<StepRecord> = rows
            .values()
            .filter(|row| row.workflow_id == workflow_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.step_key.cmp(&b.step_key));
        Ok(out)
    }
}
