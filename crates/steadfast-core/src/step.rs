//! The step primitive: claim, execute, commit.
//!
//! `Context::step` wraps a side-effecting async function and gives it
//! exactly-once-checkpoint semantics. The claim phase runs under the
//! context's claim lock so that two parallel tasks can never both observe an
//! absent row and both insert; the execute and commit phases run outside the
//! lock so unrelated steps proceed concurrently.

use std::future::Future;
use std::panic::Location;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use steadfast_types::error::{BoxError, StepError};
use steadfast_types::step::{StepRecord, StepRef, StepStatus};

use crate::context::Context;
use crate::repository::StepStore;

/// Outcome of the claim phase.
enum Claim {
    /// The row is owned by this run; execute the function.
    Execute,
    /// The row is `completed`; return the stored payload.
    Cached(String),
}

impl<S: StepStore> Context<S> {
    /// Run `f` durably as the next invocation of step `id`.
    ///
    /// On a fresh invocation the function executes and its serialized result
    /// is committed to the store. On any later run with the same workflow id
    /// and logical step position the cached result is deserialized and
    /// returned without invoking `f`. Previously `failed` rows are retried;
    /// orphaned `running` rows from a crashed run are taken over according to
    /// the context's zombie timeout.
    ///
    /// An empty `id` derives a step id from the call site (file stem and
    /// line), which stays stable as long as the source does not move.
    ///
    /// The value returned on the execute path is the in-memory result, not
    /// the round-tripped deserialized copy.
    #[track_caller]
    pub fn step<'a, T, F, Fut, E>(
        &'a self,
        id: &str,
        f: F,
    ) -> impl Future<Output = Result<T, StepError>> + Send + 'a
    where
        T: Serialize + DeserializeOwned + Send + 'a,
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, E>> + Send + 'a,
        E: Into<BoxError> + Send + 'a,
    {
        let step = self.next_step_ref(id, Location::caller());
        async move { self.run_step(step, f).await }
    }

    async fn run_step<T, F, Fut, E>(&self, step: StepRef, f: F) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        E: Into<BoxError>,
    {
        let claim = self.claim_step(&step).await?;

        if let Claim::Cached(payload) = claim {
            debug!(
                workflow_id = %self.workflow_id(),
                step_key = %step.step_key,
                "returning cached step result"
            );
            return serde_json::from_str(&payload).map_err(|source| StepError::DecodeCached {
                step_key: step.step_key,
                source,
            });
        }

        let result = match f().await {
            Ok(value) => value,
            Err(err) => {
                let source = err.into();
                self.mark_failed_best_effort(&step, &source.to_string()).await;
                return Err(StepError::Execution {
                    step_key: step.step_key,
                    source,
                });
            }
        };

        let payload = match serde_json::to_string(&result) {
            Ok(payload) => payload,
            Err(source) => {
                self.mark_failed_best_effort(&step, &format!("marshal error: {source}"))
                    .await;
                return Err(StepError::Serialize {
                    step_key: step.step_key,
                    source,
                });
            }
        };

        self.store()
            .mark_completed(self.workflow_id(), &step.step_key, self.run_id(), &payload)
            .await
            .map_err(|source| StepError::Checkpoint {
                step_key: step.step_key.clone(),
                source,
            })?;

        debug!(
            workflow_id = %self.workflow_id(),
            step_key = %step.step_key,
            "step completed"
        );
        Ok(result)
    }

    /// Decide what to do with the current row for `step`, inserting or
    /// resetting it to `running` when this run should execute.
    ///
    /// Runs entirely under the claim lock: the read and the subsequent upsert
    /// form one window.
    async fn claim_step(&self, step: &StepRef) -> Result<Claim, StepError> {
        let _guard = self.claim_lock.lock().await;

        let record = self
            .store()
            .get_step(self.workflow_id(), &step.step_key)
            .await
            .map_err(|source| StepError::Load {
                step_key: step.step_key.clone(),
                source,
            })?;

        let Some(record) = record else {
            self.claim_running(step, "insert running step").await?;
            return Ok(Claim::Execute);
        };

        match record.status {
            StepStatus::Completed => Ok(Claim::Cached(record.output_json.unwrap_or_default())),
            StepStatus::Failed => {
                debug!(
                    workflow_id = %self.workflow_id(),
                    step_key = %step.step_key,
                    "retrying previously failed step"
                );
                self.claim_running(step, "retry failed step").await?;
                Ok(Claim::Execute)
            }
            StepStatus::Running if record.run_id == self.run_id() => {
                Err(StepError::AlreadyRunning {
                    step_key: step.step_key.clone(),
                })
            }
            StepStatus::Running => {
                if !self.can_take_over_zombie(&record) {
                    return Err(StepError::StillRunning {
                        step_key: step.step_key.clone(),
                        run_id: record.run_id,
                    });
                }
                warn!(
                    workflow_id = %self.workflow_id(),
                    step_key = %step.step_key,
                    previous_run_id = %record.run_id,
                    "taking over zombie step"
                );
                self.claim_running(step, "take over zombie step").await?;
                Ok(Claim::Execute)
            }
            StepStatus::Unknown => {
                self.claim_running(step, "reset unknown state for step")
                    .await?;
                Ok(Claim::Execute)
            }
        }
    }

    async fn claim_running(&self, step: &StepRef, action: &'static str) -> Result<(), StepError> {
        self.store()
            .upsert_running(self.workflow_id(), step, self.run_id())
            .await
            .map_err(|source| StepError::Claim {
                action,
                step_key: step.step_key.clone(),
                source,
            })
    }

    /// Whether an orphaned `running` row from another run may be re-claimed.
    ///
    /// A zero timeout permits takeover unconditionally. Otherwise the row
    /// must be at least `zombie_timeout` old; a timestamp that fails to parse
    /// permits takeover (fail open) so a clock-format change cannot wedge
    /// resumption.
    fn can_take_over_zombie(&self, record: &StepRecord) -> bool {
        if self.zombie_timeout().is_zero() {
            return true;
        }
        match DateTime::parse_from_rfc3339(&record.updated_at) {
            Ok(updated) => {
                let age = Utc::now().signed_duration_since(updated.with_timezone(&Utc));
                age.to_std().is_ok_and(|age| age >= self.zombie_timeout())
            }
            Err(_) => true,
        }
    }

    /// The original failure is what the caller needs to see; a secondary
    /// store error while recording it is logged and dropped.
    async fn mark_failed_best_effort(&self, step: &StepRef, error_text: &str) {
        if let Err(err) = self
            .store()
            .mark_failed(self.workflow_id(), &step.step_key, self.run_id(), error_text)
            .await
        {
            warn!(
                workflow_id = %self.workflow_id(),
                step_key = %step.step_key,
                error = %err,
                "failed to record step failure"
            );
        }
    }
}
