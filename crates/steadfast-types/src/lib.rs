//! Shared domain types for the steadfast durable execution engine.
//!
//! This crate contains the step checkpoint types (`StepRecord`, `StepStatus`,
//! `StepRef`) and the error enums shared by the engine and its storage
//! back-ends.
//!
//! Zero infrastructure dependencies -- only serde and thiserror.
//!
//! Row timestamps are carried as RFC 3339 strings rather than parsed
//! datetimes: the store orders and compares them lexicographically, and the
//! zombie takeover check must be able to observe (and fail open on) a
//! timestamp that does not parse.

pub mod error;
pub mod step;
