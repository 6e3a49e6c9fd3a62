//! Engine core for steadfast: durable step execution over a pluggable store.
//!
//! This crate defines the "port" (`StepStore`) that the infrastructure layer
//! implements, plus the engine itself: the per-run [`Context`], the
//! [`Context::step`] primitive, the [`JoinGroup`] parallel helper, and the
//! [`run_workflow`] convenience entry point. It depends only on
//! `steadfast-types` -- never on a database crate.
//!
//! A workflow is an ordinary imperative async procedure. Wrapping each side
//! effect in `ctx.step(id, fn)` makes the procedure re-runnable: on a fresh
//! invocation the function executes and its result is checkpointed; on any
//! later run with the same workflow id and logical step position the cached
//! result is returned without the function running again.

pub mod context;
pub mod group;
pub mod repository;
pub mod runner;
pub mod step;

#[cfg(test)]
mod testutil;

pub use context::Context;
pub use group::JoinGroup;
pub use repository::StepStore;
pub use runner::run_workflow;
