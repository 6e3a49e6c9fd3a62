use thiserror::Error;

/// Boxed error type accepted from user-supplied step functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from step store operations (used by trait definitions in
/// steadfast-core).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("migration error: {0}")]
    Migrate(String),

    #[error("step row not found")]
    NotFound,
}

/// Errors surfaced by the step primitive.
///
/// Every claim decision and failure mode is observable: nothing is recovered
/// silently. The message texts are part of the contract -- callers and tests
/// match on them to distinguish cache corruption from execution failure from
/// checkpoint loss.
#[derive(Debug, Error)]
pub enum StepError {
    /// A workflow was started without an id.
    #[error("workflow id is required")]
    MissingWorkflowId,

    /// Reading the current row during the claim failed.
    #[error("load step state for {step_key}: {source}")]
    Load {
        step_key: String,
        source: StoreError,
    },

    /// Writing the `running` claim row failed. `action` names the claim
    /// branch that attempted the write.
    #[error("{action} {step_key}: {source}")]
    Claim {
        action: &'static str,
        step_key: String,
        source: StoreError,
    },

    /// The same step key was claimed twice within a single run.
    #[error("step {step_key} is already running in this execution")]
    AlreadyRunning { step_key: String },

    /// Another run owns the `running` row and the zombie timeout has not
    /// elapsed.
    #[error("step {step_key} is still running under run_id={run_id}")]
    StillRunning { step_key: String, run_id: String },

    /// A `completed` row's payload no longer deserializes into the caller's
    /// type. Fatal for the step; the cache is authoritative and the function
    /// is not re-executed.
    #[error("decode cached step result for {step_key}: {source}")]
    DecodeCached {
        step_key: String,
        source: serde_json::Error,
    },

    /// The wrapped step function returned an error. The row has been moved to
    /// `failed` (best effort); a later run may retry.
    #[error("step {step_key} failed: {source}")]
    Execution {
        step_key: String,
        source: BoxError,
    },

    /// The step result could not be serialized for checkpointing.
    #[error("marshal step result for {step_key}: {source}")]
    Serialize {
        step_key: String,
        source: serde_json::Error,
    },

    /// The function ran but the completion write failed; the row remains
    /// `running` and will be taken over on resume per the zombie policy.
    #[error(
        "step {step_key} executed but completion checkpoint failed (possible zombie step): {source}"
    )]
    Checkpoint {
        step_key: String,
        source: StoreError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display() {
        let err = StoreError::Query("no such table: steps".to_string());
        assert_eq!(err.to_string(), "query error: no such table: steps");
    }

    #[test]
    fn step_error_decode_message() {
        let source = serde_json::from_str::<u32>("not-json").unwrap_err();
        let err = StepError::DecodeCached {
            step_key: "create_record#000001".to_string(),
            source,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("decode cached step result for create_record#000001"));
    }

    #[test]
    fn step_error_checkpoint_message_marks_zombie() {
        let err = StepError::Checkpoint {
            step_key: "send_welcome_email#000001".to_string(),
            source: StoreError::Query("disk I/O error".to_string()),
        };
        assert!(err.to_string().contains("possible zombie step"));
    }

    #[test]
    fn step_error_still_running_names_owner() {
        let err = StepError::StillRunning {
            step_key: "provision_access#000001".to_string(),
            run_id: "run-a".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "step provision_access#000001 is still running under run_id=run-a"
        );
    }
}
