//! Per-run workflow context: identity, sequencing, and claim serialization.
//!
//! A `Context` lives for exactly one invocation of a workflow procedure. It
//! owns the run id, the per-step-id sequence counters that make step keys
//! stable across runs, and the claim lock that serializes the
//! read-then-upsert window of the step primitive.

use std::collections::HashMap;
use std::panic::Location;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use steadfast_types::step::StepRef;

/// Per-run state shared by all tasks of one workflow invocation.
///
/// Generic over `S: StepStore` so the engine works with any storage backend
/// (SQLite, in-memory mock, etc.). Parallel tasks share a context through
/// `Arc<Context<S>>`; the two internal mutexes make that safe:
///
/// - the sequence mutex guards the per-step-id counters (keyed by step id,
///   shared across tasks), and
/// - the claim mutex serializes the read-then-upsert window (keyed work is
///   per step key, but the window must not interleave).
///
/// They are deliberately separate locks: collapsing them would serialize
/// counter bumps behind store round-trips.
pub struct Context<S> {
    workflow_id: String,
    run_id: String,
    zombie_timeout: Duration,
    store: Arc<S>,
    sequences: Mutex<HashMap<String, u32>>,
    pub(crate) claim_lock: tokio::sync::Mutex<()>,
}

impl<S> Context<S> {
    /// Create a context for one run of `workflow_id` against `store`.
    ///
    /// The run id is freshly generated; the zombie timeout defaults to zero,
    /// meaning an orphaned `running` row from a previous run is taken over
    /// immediately. That default is only safe when a single runner is active
    /// per workflow id at a time, or when step side effects are idempotent.
    pub fn new(workflow_id: impl Into<String>, store: Arc<S>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: Uuid::now_v7().to_string(),
            zombie_timeout: Duration::ZERO,
            store,
            sequences: Mutex::new(HashMap::new()),
            claim_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Set the minimum age an orphaned `running` row must reach before this
    /// run may take it over. Zero means immediate takeover.
    pub fn with_zombie_timeout(mut self, timeout: Duration) -> Self {
        self.zombie_timeout = timeout;
        self
    }

    /// The caller-supplied workflow instance id.
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// The unique id of this in-memory run.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The configured zombie takeover threshold.
    pub fn zombie_timeout(&self) -> Duration {
        self.zombie_timeout
    }

    /// The shared store handle.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Issue the durable identity for the next invocation of `id`.
    ///
    /// For a fixed workflow procedure the sequence of refs issued here is
    /// identical across runs; that is the mechanism that lets a resume hit
    /// cached rows.
    pub(crate) fn next_step_ref(&self, id: &str, caller: &'static Location<'static>) -> StepRef {
        let step_id = resolve_step_id(id, caller);
        let mut sequences = self.sequences.lock().expect("step sequence lock poisoned");
        let sequence = sequences.entry(step_id.clone()).or_insert(0);
        *sequence += 1;
        StepRef::new(step_id, *sequence)
    }
}

/// Normalise a caller-supplied step id, deriving one from the call site when
/// the caller passed an empty string.
///
/// Normalisation: trim, lowercase, keep `[a-z0-9_\-.]` (everything else
/// becomes `_`), trim outer underscores, and fall back to `"step"` if nothing
/// survives.
fn resolve_step_id(id: &str, caller: &'static Location<'static>) -> String {
    let trimmed = id.trim();
    let raw = if trimmed.is_empty() {
        auto_step_id(caller)
    } else {
        trimmed.to_string()
    };

    let lowered = raw.to_lowercase();
    let mut cleaned = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        match c {
            'a'..='z' | '0'..='9' | '_' | '-' | '.' => cleaned.push(c),
            _ => cleaned.push('_'),
        }
    }

    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "step".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Derive a step id from static call-site metadata: `<file-stem>_<line>`.
///
/// Stable across runs of the same source, so auto-id steps still resume --
/// with the caveat that edits which move the call site invalidate the cache.
/// Explicit ids are recommended for long-lived workflows.
fn auto_step_id(caller: &'static Location<'static>) -> String {
    let stem = Path::new(caller.file())
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("step");
    format!("{}_{}", stem, caller.line())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context() -> Context<()> {
        Context::new("wf-test", Arc::new(()))
    }

    fn here() -> &'static Location<'static> {
        Location::caller()
    }

    #[test]
    fn resolve_keeps_allowed_characters() {
        assert_eq!(resolve_step_id("create_record", here()), "create_record");
        assert_eq!(resolve_step_id("a.b-c_9", here()), "a.b-c_9");
    }

    #[test]
    fn resolve_lowercases_and_replaces() {
        assert_eq!(resolve_step_id("  Create Record! ", here()), "create_record");
        assert_eq!(resolve_step_id("Step #2 (retry)", here()), "step__2__retry");
    }

    #[test]
    fn resolve_falls_back_when_nothing_survives() {
        assert_eq!(resolve_step_id("???", here()), "step");
        assert_eq!(resolve_step_id("___", here()), "step");
    }

    #[test]
    fn auto_id_uses_file_stem_and_line() {
        let caller = here();
        let id = auto_step_id(caller);
        assert!(id.starts_with("context_"));
        assert!(id.ends_with(&caller.line().to_string()));
    }

    #[test]
    fn sequence_counts_per_step_id() {
        let ctx = test_context();
        let caller = here();

        assert_eq!(ctx.next_step_ref("a", caller).step_key, "a#000001");
        assert_eq!(ctx.next_step_ref("a", caller).step_key, "a#000002");
        assert_eq!(ctx.next_step_ref("b", caller).step_key, "b#000001");
        assert_eq!(ctx.next_step_ref("a", caller).step_key, "a#000003");
    }

    #[test]
    fn sequence_is_shared_across_threads() {
        let ctx = Arc::new(test_context());
        let caller = here();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| ctx.next_step_ref("hot", caller).sequence)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        seen.sort_unstable();

        let expected: Vec<u32> = (1..=400).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn fresh_contexts_get_distinct_run_ids() {
        let a = test_context();
        let b = test_context();
        assert_ne!(a.run_id(), b.run_id());
    }
}
