//! Minimal join group for running workflow tasks in parallel.
//!
//! The onboarding pattern -- fan a few independent steps out, fail the
//! workflow on the first error -- needs nothing more than spawn-and-join
//! with first-error-wins semantics. Tasks share the workflow's
//! `Arc<Context<S>>`; concurrent `step` calls from different tasks are safe
//! because the context's sequence and claim locks serialize the shared state.

use std::future::Future;

use tokio::task::JoinSet;

/// A group of spawned tasks whose first error is reported by [`wait`].
///
/// [`wait`]: JoinGroup::wait
pub struct JoinGroup<E> {
    tasks: JoinSet<Result<(), E>>,
}

impl<E: Send + 'static> JoinGroup<E> {
    /// Create an empty group.
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
        }
    }

    /// Launch one task on the runtime.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Wait for every task to finish and return the first error to arrive;
    /// later errors are dropped. A panicking task re-panics here.
    pub async fn wait(mut self) -> Result<(), E> {
        let mut first: Option<E> = None;
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first.is_none() {
                        first = Some(err);
                    }
                }
                Err(join_err) if join_err.is_panic() => {
                    std::panic::resume_unwind(join_err.into_panic());
                }
                Err(_) => {}
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Number of tasks spawned so far that have not been joined.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the group has no outstanding tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<E: Send + 'static> Default for JoinGroup<E> {
    fn default() -> Self {
        Self::new()
    }
}
