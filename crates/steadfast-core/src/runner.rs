//! Convenience entry point for running a workflow procedure.

use std::future::Future;
use std::sync::Arc;

use tracing::info;

use steadfast_types::error::StepError;

use crate::context::Context;
use crate::repository::StepStore;

/// Build a fresh run context for `workflow_id` and invoke the workflow
/// procedure with it.
///
/// The context is handed over as an `Arc` so the procedure can share it with
/// tasks spawned through [`crate::JoinGroup`]. Workflows needing a custom
/// zombie timeout should construct the [`Context`] themselves via
/// [`Context::with_zombie_timeout`].
pub async fn run_workflow<S, F, Fut, E>(
    store: Arc<S>,
    workflow_id: impl Into<String>,
    f: F,
) -> Result<(), E>
where
    S: StepStore,
    F: FnOnce(Arc<Context<S>>) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: From<StepError>,
{
    let workflow_id = workflow_id.into();
    if workflow_id.trim().is_empty() {
        return Err(StepError::MissingWorkflowId.into());
    }

    let ctx = Arc::new(Context::new(workflow_id, store));
    info!(
        workflow_id = %ctx.workflow_id(),
        run_id = %ctx.run_id(),
        "starting workflow run"
    );
    f(ctx).await
}
