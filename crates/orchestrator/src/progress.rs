//! Real-time execution progress tracking.
//!
//! One tracker per orchestrated execution. Counter transitions keep the
//! invariant `pending + in_progress + completed + failed + cancelled ==
//! total` at every instant; terminal trackers freeze. A periodic sweep
//! cancels trackers older than the configured maximum.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use mando_catalog::ToolActionRegistry;
use mando_domain::config::TrackerConfig;
use mando_domain::error::{Error, Result};
use mando_domain::subtask::ExecutionPlan;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ProgressStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskProgress {
    pub status: ProgressStatus,
    /// Per-subtask progress percentage (0–100).
    pub pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressTracker {
    pub tracker_id: String,
    pub execution_session_id: String,
    pub conversation_session_id: String,
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub subtasks: HashMap<String, SubtaskProgress>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once every subtask is terminal; counters freeze after.
    pub finished: bool,
}

impl ProgressTracker {
    /// Overall completion percentage.
    pub fn overall_pct(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }

    /// Counter-consistency invariant.
    pub fn counters_consistent(&self) -> bool {
        self.pending + self.in_progress + self.completed + self.failed + self.cancelled
            == self.total
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory store of active trackers.
pub struct ProgressStore {
    cfg: TrackerConfig,
    trackers: RwLock<HashMap<String, ProgressTracker>>,
}

impl ProgressStore {
    pub fn new(cfg: TrackerConfig) -> Self {
        Self {
            cfg,
            trackers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.cfg
    }

    /// Start tracking an execution: every subtask begins Pending.
    pub fn start(
        &self,
        execution_session_id: &str,
        conversation_session_id: &str,
        subtask_ids: &[String],
    ) -> String {
        let tracker_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let subtasks = subtask_ids
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    SubtaskProgress {
                        status: ProgressStatus::Pending,
                        pct: 0.0,
                        result: None,
                        error: None,
                        updated_at: now,
                    },
                )
            })
            .collect();

        let tracker = ProgressTracker {
            tracker_id: tracker_id.clone(),
            execution_session_id: execution_session_id.to_owned(),
            conversation_session_id: conversation_session_id.to_owned(),
            total: subtask_ids.len(),
            pending: subtask_ids.len(),
            in_progress: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            subtasks,
            started_at: now,
            updated_at: now,
            finished: false,
        };
        self.trackers.write().insert(tracker_id.clone(), tracker);
        tracker_id
    }

    pub fn get(&self, tracker_id: &str) -> Option<ProgressTracker> {
        self.trackers.read().get(tracker_id).cloned()
    }

    /// Apply one subtask transition, keeping the counters consistent.
    ///
    /// Non-terminal updates are throttled to `update_interval_ms` per
    /// subtask (and dropped entirely when real-time tracking is off);
    /// terminal transitions always apply. Updates to a finished tracker
    /// are rejected.
    pub fn update(
        &self,
        tracker_id: &str,
        subtask_id: &str,
        status: ProgressStatus,
        pct: f64,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<()> {
        let mut trackers = self.trackers.write();
        let tracker = trackers
            .get_mut(tracker_id)
            .ok_or_else(|| Error::Validation(format!("unknown tracker {tracker_id}")))?;

        if tracker.finished {
            return Err(Error::Validation(format!(
                "tracker {tracker_id} already finished"
            )));
        }

        let now = Utc::now();
        let entry = tracker
            .subtasks
            .get_mut(subtask_id)
            .ok_or_else(|| Error::Validation(format!("unknown subtask {subtask_id}")))?;

        let previous = entry.status;
        if previous.is_terminal() {
            // Terminal subtask states freeze.
            return Ok(());
        }

        if !status.is_terminal() {
            if !self.cfg.enable_real_time_tracking {
                return Ok(());
            }
            // Throttle chatty non-terminal updates, but always let the
            // Pending → InProgress transition through.
            let elapsed_ms = (now - entry.updated_at).num_milliseconds() as u64;
            if status == previous && elapsed_ms < self.cfg.update_interval_ms {
                return Ok(());
            }
        }

        entry.status = status;
        entry.pct = pct.clamp(0.0, 100.0);
        if result.is_some() {
            entry.result = result;
        }
        if error.is_some() {
            entry.error = error;
        }
        entry.updated_at = now;

        // Counter bookkeeping for the state transition.
        if previous != status {
            match previous {
                ProgressStatus::Pending => tracker.pending -= 1,
                ProgressStatus::InProgress => tracker.in_progress -= 1,
                _ => {}
            }
            match status {
                ProgressStatus::Pending => tracker.pending += 1,
                ProgressStatus::InProgress => tracker.in_progress += 1,
                ProgressStatus::Completed => tracker.completed += 1,
                ProgressStatus::Failed => tracker.failed += 1,
                ProgressStatus::Cancelled => tracker.cancelled += 1,
            }
        }

        tracker.updated_at = now;
        debug_assert!(tracker.counters_consistent());

        if tracker.pending == 0 && tracker.in_progress == 0 {
            tracker.finished = true;
        }

        Ok(())
    }

    /// Validate a finished execution: every subtask completed, every
    /// declared dependency satisfied, and every result object carries
    /// the action's expected keys. Returns the list of violations.
    pub fn validate_completion(
        &self,
        tracker_id: &str,
        plan: &ExecutionPlan,
        actions: &ToolActionRegistry,
    ) -> Result<std::result::Result<(), Vec<String>>> {
        let trackers = self.trackers.read();
        let tracker = trackers
            .get(tracker_id)
            .ok_or_else(|| Error::Validation(format!("unknown tracker {tracker_id}")))?;

        let mut violations = Vec::new();

        for subtask in plan.iter() {
            let Some(progress) = tracker.subtasks.get(&subtask.subtask_id) else {
                violations.push(format!("subtask {} untracked", subtask.subtask_id));
                continue;
            };

            if progress.status != ProgressStatus::Completed {
                violations.push(format!(
                    "subtask {} not completed ({:?})",
                    subtask.subtask_id, progress.status
                ));
                continue;
            }

            for dep in &subtask.dependencies {
                let satisfied = tracker
                    .subtasks
                    .get(dep)
                    .is_some_and(|d| d.status == ProgressStatus::Completed);
                if !satisfied {
                    violations.push(format!(
                        "subtask {} dependency {dep} unsatisfied",
                        subtask.subtask_id
                    ));
                }
            }

            if let Some(action) = actions.get(&subtask.action_id) {
                if !action.result_keys.is_empty() {
                    let keys_ok = progress
                        .result
                        .as_ref()
                        .and_then(|r| r.as_object())
                        .map(|obj| action.result_keys.iter().all(|k| obj.contains_key(k)))
                        .unwrap_or(false);
                    if !keys_ok {
                        violations.push(format!(
                            "subtask {} result missing expected keys {:?}",
                            subtask.subtask_id, action.result_keys
                        ));
                    }
                }
            }
        }

        Ok(if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        })
    }

    /// Cancel trackers older than `max_tracking_duration_minutes`.
    /// Returns how many were cancelled.
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> usize {
        let cutoff = chrono::Duration::minutes(self.cfg.max_tracking_duration_minutes as i64);
        let mut cancelled = 0;
        let mut trackers = self.trackers.write();
        for tracker in trackers.values_mut() {
            if tracker.finished || now - tracker.started_at < cutoff {
                continue;
            }
            for entry in tracker.subtasks.values_mut() {
                if !entry.status.is_terminal() {
                    match entry.status {
                        ProgressStatus::Pending => tracker.pending -= 1,
                        ProgressStatus::InProgress => tracker.in_progress -= 1,
                        _ => {}
                    }
                    entry.status = ProgressStatus::Cancelled;
                    entry.updated_at = now;
                    tracker.cancelled += 1;
                }
            }
            tracker.finished = true;
            tracker.updated_at = now;
            cancelled += 1;
        }
        cancelled
    }

    /// Drop finished trackers to bound memory (hygiene, not part of the
    /// sweep contract).
    pub fn evict_finished(&self, older_than: chrono::Duration) {
        let cutoff = Utc::now() - older_than;
        self.trackers
            .write()
            .retain(|_, t| !t.finished || t.updated_at > cutoff);
    }
}

/// Background sweep loop. Exits when `stop` flips to `true`.
pub async fn run_sweep_loop(store: Arc<ProgressStore>, mut stop: watch::Receiver<bool>) {
    let interval = std::time::Duration::from_secs(store.cfg.sweep_interval_secs.max(1));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let cancelled = store.sweep_stale(Utc::now());
                if cancelled > 0 {
                    tracing::debug!(cancelled, "stale tracker sweep");
                }
                store.evict_finished(chrono::Duration::hours(1));
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    tracing::debug!("tracker sweep loop stopping");
                    return;
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
