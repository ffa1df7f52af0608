//! Job execution: the bounded pool and the per-job runner.

pub mod pool;
pub mod runner;

pub use pool::{PoolSettings, WorkerPool};
pub use runner::{JobRunner, ReportPolicy, RunSummary};
