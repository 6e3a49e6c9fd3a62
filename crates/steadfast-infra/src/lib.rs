//! Infrastructure layer for steadfast.
//!
//! Contains the SQLite implementation of the `StepStore` trait defined in
//! `steadfast-core`: a WAL-mode database with a split read/write pool and
//! bounded busy-retry on writes.

pub mod sqlite;
