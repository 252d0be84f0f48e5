use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task orchestration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Execute subtasks within a dependency level concurrently.
    #[serde(default = "d_true")]
    pub enable_parallel_execution: bool,
    /// Concurrency cap within a level.
    #[serde(default = "d_max_parallel")]
    pub max_parallel_tasks: usize,
    /// Retry failed subtasks before declaring them Failed.
    #[serde(default = "d_true")]
    pub enable_error_recovery: bool,
    /// On critical failure, cancel remaining levels and roll back
    /// completed subtasks whose action supports it.
    #[serde(default = "d_true")]
    pub enable_rollback_on_failure: bool,
    /// Per-action invocation timeout in seconds.
    #[serde(default = "d_task_timeout_secs")]
    pub task_timeout_seconds: u64,
    /// Retry ceiling per subtask (the subtask's own limit caps lower).
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    /// Linear backoff base: attempt n sleeps `retry_delay_ms × n`.
    #[serde(default = "d_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Ceiling on subtasks produced by decomposition.
    #[serde(default = "d_max_subtasks")]
    pub max_subtasks: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enable_parallel_execution: true,
            max_parallel_tasks: d_max_parallel(),
            enable_error_recovery: true,
            enable_rollback_on_failure: true,
            task_timeout_seconds: d_task_timeout_secs(),
            max_retries: d_max_retries(),
            retry_delay_ms: d_retry_delay_ms(),
            max_subtasks: d_max_subtasks(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Progress tracking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Progress tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Publish per-subtask updates as they happen (off = terminal only).
    #[serde(default = "d_true")]
    pub enable_real_time_tracking: bool,
    /// Minimum interval between published updates for one subtask.
    #[serde(default = "d_update_interval_ms")]
    pub update_interval_ms: u64,
    /// Trackers older than this are cancelled by the sweep.
    #[serde(default = "d_max_tracking_minutes")]
    pub max_tracking_duration_minutes: u32,
    /// Interval of the stale-tracker sweep, in seconds.
    #[serde(default = "d_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            enable_real_time_tracking: true,
            update_interval_ms: d_update_interval_ms(),
            max_tracking_duration_minutes: d_max_tracking_minutes(),
            sweep_interval_secs: d_sweep_interval_secs(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_max_parallel() -> usize {
    4
}
fn d_task_timeout_secs() -> u64 {
    30
}
fn d_max_retries() -> u32 {
    2
}
fn d_retry_delay_ms() -> u64 {
    500
}
fn d_max_subtasks() -> usize {
    8
}
fn d_update_interval_ms() -> u64 {
    250
}
fn d_max_tracking_minutes() -> u32 {
    30
}
fn d_sweep_interval_secs() -> u64 {
    60
}
