//! Subtask decomposition, validation, dependency resolution, execution,
//! and progress tracking.
//!
//! One utterance becomes a dependency-ordered DAG of tool calls,
//! executed level by level with bounded parallelism, retries with
//! linear backoff, rollback on critical failure, and per-subtask
//! progress reporting.

pub mod decompose;
pub mod executor;
pub mod progress;
pub mod resolver;
pub mod validate;

pub use decompose::SubtaskDecomposer;
pub use executor::TaskOrchestrator;
pub use progress::{run_sweep_loop, ProgressStatus, ProgressStore, ProgressTracker};
pub use resolver::DependencyResolver;
pub use validate::validate_batch;
