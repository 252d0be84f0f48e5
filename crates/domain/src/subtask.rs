use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subtask
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    #[default]
    Pending,
    Executing,
    Completed,
    Failed,
    Retrying,
    Cancelled,
    Timeout,
}

impl SubtaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// One concrete tool invocation derived from an utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub subtask_id: String,
    /// Tool action this subtask invokes.
    pub action_id: String,
    pub description: String,
    /// Named arguments, keyed by parameter name. BTreeMap keeps argument
    /// order deterministic for dedup canonicalization.
    #[serde(default)]
    pub entities: BTreeMap<String, serde_json::Value>,
    /// Subtask ids this one depends on (within the same plan).
    #[serde(default)]
    pub dependencies: HashSet<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    /// Decomposition confidence in `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub status: SubtaskStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn d_max_retries() -> u32 {
    2
}

impl Subtask {
    pub fn new(subtask_id: impl Into<String>, action_id: impl Into<String>) -> Self {
        Self {
            subtask_id: subtask_id.into(),
            action_id: action_id.into(),
            description: String::new(),
            entities: BTreeMap::new(),
            dependencies: HashSet::new(),
            priority: Priority::Medium,
            max_retries: d_max_retries(),
            confidence: 1.0,
            status: SubtaskStatus::Pending,
            retry_count: 0,
            result: None,
            error: None,
        }
    }

    /// Canonical `(action, sorted entities)` form used for deduplication.
    pub fn canonical_key(&self) -> String {
        let entities = self
            .entities
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}|{entities}", self.action_id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dependency-ordered plan: each level holds subtasks whose dependencies
/// are all in earlier levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan_id: String,
    /// Topological level decomposition. Level 0 has no dependencies.
    pub levels: Vec<Vec<Subtask>>,
}

impl ExecutionPlan {
    /// Total subtask count across all levels.
    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(Vec::is_empty)
    }

    /// Iterate all subtasks level by level.
    pub fn iter(&self) -> impl Iterator<Item = &Subtask> {
        self.levels.iter().flatten()
    }

    /// Check the plan invariants: every dependency is intra-plan and in
    /// an earlier level, and no subtask id appears twice.
    pub fn check(&self) -> crate::error::Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for (level_idx, level) in self.levels.iter().enumerate() {
            for subtask in level {
                for dep in &subtask.dependencies {
                    if !seen.contains(dep.as_str()) {
                        return Err(crate::error::Error::Invariant(format!(
                            "subtask {} at level {level_idx} depends on {dep}, which is not in an earlier level",
                            subtask.subtask_id
                        )));
                    }
                }
            }
            // Ids become visible to later levels only; same-level deps are
            // unresolved by definition.
            for subtask in level {
                if !seen.insert(&subtask.subtask_id) {
                    return Err(crate::error::Error::Invariant(format!(
                        "duplicate subtask id {} in plan",
                        subtask.subtask_id
                    )));
                }
            }
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Final report of one orchestrated execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionResult {
    pub execution_id: String,
    /// Progress tracker of this execution.
    pub tracker_id: String,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    /// Subtask ids rolled back after a critical failure, in rollback order.
    #[serde(default)]
    pub rolled_back: Vec<String>,
    /// Per-subtask terminal snapshots.
    pub subtasks: Vec<Subtask>,
    pub all_successful: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TaskExecutionResult {
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
