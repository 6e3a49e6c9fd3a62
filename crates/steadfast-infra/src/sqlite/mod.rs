//! SQLite persistence: connection pool and the step store implementation.

pub mod pool;
pub mod steps;

pub use pool::DatabasePool;
pub use steps::SqliteStepStore;
