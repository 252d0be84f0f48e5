//! Plan execution.
//!
//! Executes an `ExecutionPlan` level by level: no subtask of level i+1
//! starts before every subtask of level i terminated. Within a level,
//! execution is concurrent (bounded by `max_parallel_tasks`) or
//! sequential. Failures retry with linear backoff; critical failures
//! halt remaining levels and roll back completed subtasks in reverse
//! completion order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use mando_catalog::{InvocationCtx, ToolActionRegistry};
use mando_domain::cancel::CancelToken;
use mando_domain::config::OrchestratorConfig;
use mando_domain::error::Error;
use mando_domain::subtask::{ExecutionPlan, Subtask, SubtaskStatus, TaskExecutionResult};
use mando_domain::trace::TraceEvent;

use crate::progress::{ProgressStatus, ProgressStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A completed invocation remembered for potential rollback.
struct CompletionRecord {
    subtask_id: String,
    action_id: String,
    entities: BTreeMap<String, serde_json::Value>,
    result: serde_json::Value,
}

pub struct TaskOrchestrator {
    actions: Arc<ToolActionRegistry>,
    progress: Arc<ProgressStore>,
    cfg: OrchestratorConfig,
}

impl TaskOrchestrator {
    pub fn new(
        actions: Arc<ToolActionRegistry>,
        progress: Arc<ProgressStore>,
        cfg: OrchestratorConfig,
    ) -> Self {
        Self {
            actions,
            progress,
            cfg,
        }
    }

    pub fn progress_store(&self) -> &Arc<ProgressStore> {
        &self.progress
    }

    /// Execute a plan to completion (or to critical halt / cancellation).
    ///
    /// Never errors: the returned result carries per-subtask outcomes
    /// including partial successes.
    pub async fn execute(
        &self,
        plan: ExecutionPlan,
        conversation_session_id: &str,
        cancel: &CancelToken,
    ) -> TaskExecutionResult {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();

        let all_ids: Vec<String> = plan.iter().map(|s| s.subtask_id.clone()).collect();
        let tracker_id = self
            .progress
            .start(&execution_id, conversation_session_id, &all_ids);

        let completions: Mutex<Vec<CompletionRecord>> = Mutex::new(Vec::new());
        let mut finished: Vec<Subtask> = Vec::with_capacity(all_ids.len());
        let mut halted = false;

        for level in plan.levels {
            if halted || cancel.is_cancelled() {
                for subtask in level {
                    finished.push(self.mark_cancelled(subtask, &tracker_id));
                }
                continue;
            }

            let level_results = if self.cfg.enable_parallel_execution && level.len() > 1 {
                let semaphore = Arc::new(Semaphore::new(self.cfg.max_parallel_tasks));
                let futures = level.into_iter().map(|subtask| {
                    let semaphore = semaphore.clone();
                    let tracker_id = tracker_id.clone();
                    let execution_id = execution_id.clone();
                    let completions = &completions;
                    async move {
                        let _permit = semaphore.acquire().await;
                        self.run_subtask(
                            subtask,
                            &tracker_id,
                            &execution_id,
                            conversation_session_id,
                            completions,
                            cancel,
                        )
                        .await
                    }
                });
                join_all(futures).await
            } else {
                let mut results = Vec::with_capacity(level.len());
                for subtask in level {
                    results.push(
                        self.run_subtask(
                            subtask,
                            &tracker_id,
                            &execution_id,
                            conversation_session_id,
                            &completions,
                            cancel,
                        )
                        .await,
                    );
                }
                results
            };

            // A critical failure in this level halts the remaining ones.
            let critical = level_results.iter().any(|s| {
                s.status == SubtaskStatus::Timeout
                    || (s.status == SubtaskStatus::Failed
                        && s.error.as_deref().is_some_and(error_is_critical))
            });
            finished.extend(level_results);

            if critical {
                halted = true;
            }
        }

        // Roll back completed work after a critical halt.
        let mut rolled_back = Vec::new();
        if halted && self.cfg.enable_rollback_on_failure {
            rolled_back = self
                .rollback(&execution_id, &tracker_id, &completions, &mut finished)
                .await;
        }

        let completed = finished
            .iter()
            .filter(|s| s.status == SubtaskStatus::Completed)
            .count();
        let failed = finished
            .iter()
            .filter(|s| matches!(s.status, SubtaskStatus::Failed | SubtaskStatus::Timeout))
            .count();
        let cancelled = finished
            .iter()
            .filter(|s| s.status == SubtaskStatus::Cancelled)
            .count();

        let result = TaskExecutionResult {
            execution_id: execution_id.clone(),
            tracker_id,
            total_tasks: finished.len(),
            completed_tasks: completed,
            failed_tasks: failed,
            cancelled_tasks: cancelled,
            rolled_back,
            subtasks: finished,
            all_successful: failed == 0 && cancelled == 0,
            started_at,
            finished_at: Utc::now(),
        };

        TraceEvent::ExecutionFinished {
            execution_id,
            total: result.total_tasks,
            completed: result.completed_tasks,
            failed: result.failed_tasks,
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        result
    }

    // ── one subtask ─────────────────────────────────────────────────

    async fn run_subtask(
        &self,
        mut subtask: Subtask,
        tracker_id: &str,
        execution_id: &str,
        conversation_session_id: &str,
        completions: &Mutex<Vec<CompletionRecord>>,
        cancel: &CancelToken,
    ) -> Subtask {
        if cancel.is_cancelled() {
            return self.mark_cancelled(subtask, tracker_id);
        }

        let start = Instant::now();
        let action = self.actions.get(&subtask.action_id);
        let idempotent = action.as_ref().is_some_and(|a| a.idempotent);
        let timeout = Duration::from_secs(self.cfg.task_timeout_seconds);
        let max_retries = if self.cfg.enable_error_recovery {
            subtask.max_retries.min(self.cfg.max_retries)
        } else {
            0
        };

        subtask.status = SubtaskStatus::Executing;
        self.publish(tracker_id, &subtask.subtask_id, ProgressStatus::InProgress, 0.0, None, None);

        let ctx = InvocationCtx {
            session_id: conversation_session_id.to_owned(),
            request_id: execution_id.to_owned(),
            timeout,
        };

        loop {
            let attempt = tokio::time::timeout(
                timeout,
                self.actions.invoke(&subtask.action_id, &subtask.entities, &ctx),
            )
            .await;

            let error = match attempt {
                Ok(Ok(result)) => {
                    subtask.status = SubtaskStatus::Completed;
                    subtask.result = Some(result.clone());
                    completions.lock().push(CompletionRecord {
                        subtask_id: subtask.subtask_id.clone(),
                        action_id: subtask.action_id.clone(),
                        entities: subtask.entities.clone(),
                        result: result.clone(),
                    });
                    self.publish(
                        tracker_id,
                        &subtask.subtask_id,
                        ProgressStatus::Completed,
                        100.0,
                        Some(result),
                        None,
                    );
                    self.trace_terminal(&subtask, start);
                    return subtask;
                }
                Ok(Err(e)) => e,
                Err(_) => Error::Timeout(format!("action {}", subtask.action_id)),
            };

            if cancel.is_cancelled() {
                return self.mark_cancelled(subtask, tracker_id);
            }

            // Non-idempotent actions only retry when the request never
            // reached the endpoint (connect-phase failure).
            let retriable_for_action = idempotent || error_never_delivered(&error);
            if subtask.retry_count < max_retries && error.is_transient() && retriable_for_action {
                subtask.retry_count += 1;
                subtask.status = SubtaskStatus::Retrying;
                tracing::debug!(
                    subtask = %subtask.subtask_id,
                    attempt = subtask.retry_count,
                    error = %error,
                    "retrying subtask"
                );
                // Linear backoff.
                tokio::time::sleep(Duration::from_millis(
                    self.cfg.retry_delay_ms * subtask.retry_count as u64,
                ))
                .await;
                subtask.status = SubtaskStatus::Executing;
                continue;
            }

            subtask.status = if matches!(error, Error::Timeout(_)) {
                SubtaskStatus::Timeout
            } else {
                SubtaskStatus::Failed
            };
            subtask.error = Some(error.to_string());
            self.publish(
                tracker_id,
                &subtask.subtask_id,
                ProgressStatus::Failed,
                0.0,
                None,
                subtask.error.clone(),
            );
            self.trace_terminal(&subtask, start);
            return subtask;
        }
    }

    fn mark_cancelled(&self, mut subtask: Subtask, tracker_id: &str) -> Subtask {
        subtask.status = SubtaskStatus::Cancelled;
        self.publish(
            tracker_id,
            &subtask.subtask_id,
            ProgressStatus::Cancelled,
            0.0,
            None,
            None,
        );
        subtask
    }

    fn publish(
        &self,
        tracker_id: &str,
        subtask_id: &str,
        status: ProgressStatus,
        pct: f64,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) {
        if let Err(e) = self
            .progress
            .update(tracker_id, subtask_id, status, pct, result, error)
        {
            // Rollback updates race the tracker freezing on the last
            // terminal transition; rejected updates are expected there.
            tracing::debug!(error = %e, subtask_id, "progress update rejected");
        }
    }

    fn trace_terminal(&self, subtask: &Subtask, start: Instant) {
        TraceEvent::SubtaskTerminal {
            subtask_id: subtask.subtask_id.clone(),
            action: subtask.action_id.clone(),
            status: subtask.status.as_str().into(),
            duration_ms: start.elapsed().as_millis() as u64,
            retries: subtask.retry_count,
        }
        .emit();
    }

    // ── rollback ────────────────────────────────────────────────────

    /// Compensate completed subtasks in reverse completion order; each
    /// rolled-back subtask moves to Cancelled. Only actions declaring
    /// rollback capability participate.
    async fn rollback(
        &self,
        execution_id: &str,
        tracker_id: &str,
        completions: &Mutex<Vec<CompletionRecord>>,
        finished: &mut [Subtask],
    ) -> Vec<String> {
        let records: Vec<CompletionRecord> = {
            let mut guard = completions.lock();
            guard.drain(..).collect()
        };

        TraceEvent::RollbackStarted {
            execution_id: execution_id.to_owned(),
            completed_subtasks: records.len(),
        }
        .emit();

        let mut rolled_back = Vec::new();
        for record in records.iter().rev() {
            let supports = self
                .actions
                .get(&record.action_id)
                .is_some_and(|a| a.supports_rollback);
            if !supports {
                continue;
            }

            if let Err(e) = self
                .actions
                .rollback(&record.action_id, &record.entities, &record.result)
                .await
            {
                tracing::warn!(
                    subtask = %record.subtask_id,
                    action = %record.action_id,
                    error = %e,
                    "rollback call failed"
                );
            }

            if let Some(subtask) = finished
                .iter_mut()
                .find(|s| s.subtask_id == record.subtask_id)
            {
                subtask.status = SubtaskStatus::Cancelled;
            }
            self.publish(
                tracker_id,
                &record.subtask_id,
                ProgressStatus::Cancelled,
                0.0,
                None,
                None,
            );
            rolled_back.push(record.subtask_id.clone());
        }

        TraceEvent::RollbackFinished {
            execution_id: execution_id.to_owned(),
            rolled_back: rolled_back.len(),
        }
        .emit();

        rolled_back
    }
}

/// Critical errors: timeout, connection failure, authentication or
/// authorization rejection (matched on the stored error text).
fn error_is_critical(message: &str) -> bool {
    message.starts_with("timeout")
        || message.contains("connection")
        || message.starts_with("auth")
        || message.contains("HTTP 401")
        || message.contains("HTTP 403")
}

/// Whether the failure happened before the request was delivered.
fn error_never_delivered(error: &Error) -> bool {
    matches!(error, Error::Http(message) if message.contains("connection"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use mando_catalog::{ParamSpec, ParamType, SideEffect, ToolAction, ToolAdapter};
    use mando_domain::config::TrackerConfig;
    use mando_domain::error::Result;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ── test scaffolding ────────────────────────────────────────────

    #[derive(Default)]
    struct AdapterState {
        scripted: Mutex<VecDeque<Result<serde_json::Value>>>,
        invocations: Mutex<Vec<String>>,
        rollbacks: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    struct TestAdapter {
        name: String,
        state: Arc<AdapterState>,
        delay: Option<Duration>,
    }

    #[async_trait::async_trait]
    impl ToolAdapter for TestAdapter {
        async fn invoke(
            &self,
            _args: &BTreeMap<String, serde_json::Value>,
            _ctx: &InvocationCtx,
        ) -> Result<serde_json::Value> {
            let current = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.state.peak_in_flight.fetch_max(current, Ordering::SeqCst);
            self.state.invocations.lock().push(self.name.clone());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.state.scripted.lock().pop_front() {
                Some(result) => result,
                None => Ok(serde_json::json!({"ok": true})),
            }
        }

        async fn rollback(
            &self,
            _args: &BTreeMap<String, serde_json::Value>,
            _result: &serde_json::Value,
        ) -> Result<()> {
            self.state.rollbacks.lock().push(self.name.clone());
            Ok(())
        }
    }

    struct Fixture {
        actions: Arc<ToolActionRegistry>,
        state: Arc<AdapterState>,
        cfg: OrchestratorConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                actions: Arc::new(ToolActionRegistry::new()),
                state: Arc::new(AdapterState::default()),
                cfg: OrchestratorConfig {
                    retry_delay_ms: 1,
                    task_timeout_seconds: 1,
                    ..OrchestratorConfig::default()
                },
            }
        }

        fn register(&self, action_id: &str, idempotent: bool, rollback: bool) {
            self.register_with_delay(action_id, idempotent, rollback, None);
        }

        fn register_with_delay(
            &self,
            action_id: &str,
            idempotent: bool,
            rollback: bool,
            delay: Option<Duration>,
        ) {
            self.actions.register(
                ToolAction {
                    action_id: action_id.into(),
                    endpoint: format!("http://tools/{action_id}"),
                    params: vec![ParamSpec::optional("arg", ParamType::String)],
                    result_keys: Vec::new(),
                    side_effect: SideEffect::External,
                    idempotent,
                    supports_rollback: rollback,
                },
                Arc::new(TestAdapter {
                    name: action_id.into(),
                    state: self.state.clone(),
                    delay,
                }),
            );
        }

        fn orchestrator(&self) -> TaskOrchestrator {
            let mut tracker_cfg = TrackerConfig::default();
            tracker_cfg.update_interval_ms = 0;
            TaskOrchestrator::new(
                self.actions.clone(),
                Arc::new(ProgressStore::new(tracker_cfg)),
                self.cfg.clone(),
            )
        }

        fn script(&self, result: Result<serde_json::Value>) {
            self.state.scripted.lock().push_back(result);
        }
    }

    fn subtask(id: &str, action: &str) -> Subtask {
        let mut s = Subtask::new(id, action);
        s.description = format!("ejecutar {action}");
        s
    }

    fn plan(levels: Vec<Vec<Subtask>>) -> ExecutionPlan {
        ExecutionPlan {
            plan_id: "p".into(),
            levels,
        }
    }

    // ── happy paths ─────────────────────────────────────────────────

    #[tokio::test]
    async fn single_subtask_completes() {
        let fixture = Fixture::new();
        fixture.register("encender_luz", true, false);
        let orchestrator = fixture.orchestrator();

        let result = orchestrator
            .execute(
                plan(vec![vec![subtask("a", "encender_luz")]]),
                "conv-1",
                &CancelToken::new(),
            )
            .await;

        assert!(result.all_successful);
        assert_eq!(result.completed_tasks, 1);
        assert_eq!(result.failed_tasks, 0);
        assert_eq!(result.subtasks[0].status, SubtaskStatus::Completed);
        assert!(result.subtasks[0].result.is_some());

        let tracker = orchestrator
            .progress_store()
            .get(&result.tracker_id)
            .unwrap();
        assert!((tracker.overall_pct() - 100.0).abs() < 1e-9);
        assert!(tracker.finished);
    }

    #[tokio::test]
    async fn levels_run_in_order() {
        let fixture = Fixture::new();
        fixture.register("primero", true, false);
        fixture.register("segundo", true, false);
        let orchestrator = fixture.orchestrator();

        let mut second = subtask("b", "segundo");
        second.dependencies.insert("a".into());
        let result = orchestrator
            .execute(
                plan(vec![vec![subtask("a", "primero")], vec![second]]),
                "conv-1",
                &CancelToken::new(),
            )
            .await;

        assert!(result.all_successful);
        assert_eq!(
            *fixture.state.invocations.lock(),
            vec!["primero".to_string(), "segundo".to_string()]
        );
    }

    #[tokio::test]
    async fn parallel_level_bounded_by_cap() {
        let mut fixture = Fixture::new();
        fixture.cfg.max_parallel_tasks = 2;
        fixture.register_with_delay("lenta", true, false, Some(Duration::from_millis(50)));
        let orchestrator = fixture.orchestrator();

        let level: Vec<Subtask> = (0..5).map(|i| subtask(&format!("s{i}"), "lenta")).collect();
        let started = Instant::now();
        let result = orchestrator
            .execute(plan(vec![level]), "conv-1", &CancelToken::new())
            .await;

        assert!(result.all_successful);
        assert_eq!(result.completed_tasks, 5);
        let peak = fixture.state.peak_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak concurrency {peak} exceeded cap");
        // 5 tasks × 50 ms at concurrency 2 ≥ 150 ms, well under the
        // 250 ms a sequential run would need.
        assert!(started.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn sequential_mode_runs_one_at_a_time() {
        let mut fixture = Fixture::new();
        fixture.cfg.enable_parallel_execution = false;
        fixture.register_with_delay("lenta", true, false, Some(Duration::from_millis(10)));
        let orchestrator = fixture.orchestrator();

        let level: Vec<Subtask> = (0..3).map(|i| subtask(&format!("s{i}"), "lenta")).collect();
        let result = orchestrator
            .execute(plan(vec![level]), "conv-1", &CancelToken::new())
            .await;

        assert!(result.all_successful);
        assert_eq!(fixture.state.peak_in_flight.load(Ordering::SeqCst), 1);
    }

    // ── retries ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn transient_failure_retries_then_succeeds() {
        let fixture = Fixture::new();
        fixture.register("inestable", true, false);
        fixture.script(Err(Error::Provider {
            provider: "tools".into(),
            message: "HTTP 503: unavailable".into(),
        }));
        let orchestrator = fixture.orchestrator();

        let result = orchestrator
            .execute(
                plan(vec![vec![subtask("a", "inestable")]]),
                "conv-1",
                &CancelToken::new(),
            )
            .await;

        assert!(result.all_successful);
        assert_eq!(result.subtasks[0].retry_count, 1);
        assert_eq!(fixture.state.invocations.lock().len(), 2);
    }

    #[tokio::test]
    async fn permanent_failure_does_not_retry() {
        let fixture = Fixture::new();
        fixture.register("estricta", true, false);
        fixture.script(Err(Error::Validation("bad args".into())));
        let orchestrator = fixture.orchestrator();

        let result = orchestrator
            .execute(
                plan(vec![vec![subtask("a", "estricta")]]),
                "conv-1",
                &CancelToken::new(),
            )
            .await;

        assert!(!result.all_successful);
        assert_eq!(result.failed_tasks, 1);
        assert_eq!(result.subtasks[0].retry_count, 0);
        assert_eq!(fixture.state.invocations.lock().len(), 1);
    }

    #[tokio::test]
    async fn non_idempotent_not_retried_on_5xx() {
        let fixture = Fixture::new();
        fixture.register("paga", false, false);
        fixture.script(Err(Error::Provider {
            provider: "tools".into(),
            message: "HTTP 502: bad gateway".into(),
        }));
        let orchestrator = fixture.orchestrator();

        let result = orchestrator
            .execute(
                plan(vec![vec![subtask("a", "paga")]]),
                "conv-1",
                &CancelToken::new(),
            )
            .await;

        // The request may have been processed; a non-idempotent action
        // must not run twice.
        assert_eq!(result.failed_tasks, 1);
        assert_eq!(fixture.state.invocations.lock().len(), 1);
    }

    #[tokio::test]
    async fn non_idempotent_retried_on_connect_failure() {
        let fixture = Fixture::new();
        fixture.register("paga", false, false);
        fixture.script(Err(Error::Http("connection failed: refused".into())));
        let orchestrator = fixture.orchestrator();

        let result = orchestrator
            .execute(
                plan(vec![vec![subtask("a", "paga")]]),
                "conv-1",
                &CancelToken::new(),
            )
            .await;

        assert!(result.all_successful);
        assert_eq!(fixture.state.invocations.lock().len(), 2);
    }

    #[tokio::test]
    async fn error_recovery_disabled_means_no_retries() {
        let mut fixture = Fixture::new();
        fixture.cfg.enable_error_recovery = false;
        fixture.register("inestable", true, false);
        fixture.script(Err(Error::Provider {
            provider: "tools".into(),
            message: "HTTP 503: unavailable".into(),
        }));
        let orchestrator = fixture.orchestrator();

        let result = orchestrator
            .execute(
                plan(vec![vec![subtask("a", "inestable")]]),
                "conv-1",
                &CancelToken::new(),
            )
            .await;

        assert_eq!(result.failed_tasks, 1);
        assert_eq!(fixture.state.invocations.lock().len(), 1);
    }

    // ── critical failure and rollback ───────────────────────────────

    #[tokio::test]
    async fn auth_failure_rolls_back_completed_work() {
        let fixture = Fixture::new();
        fixture.register("crear_github_issue", false, true);
        fixture.register("asignar_issue", false, false);
        fixture.script(Ok(serde_json::json!({"issue_id": 42})));
        fixture.script(Err(Error::Auth("tool returned 401 Unauthorized".into())));
        let orchestrator = fixture.orchestrator();

        let mut assign = subtask("asignar", "asignar_issue");
        assign.dependencies.insert("crear".into());
        let result = orchestrator
            .execute(
                plan(vec![
                    vec![subtask("crear", "crear_github_issue")],
                    vec![assign],
                ]),
                "conv-1",
                &CancelToken::new(),
            )
            .await;

        assert!(!result.all_successful);
        assert_eq!(result.failed_tasks, 1);
        assert_eq!(result.rolled_back, vec!["crear".to_string()]);
        assert_eq!(
            *fixture.state.rollbacks.lock(),
            vec!["crear_github_issue".to_string()]
        );

        let create = result
            .subtasks
            .iter()
            .find(|s| s.subtask_id == "crear")
            .unwrap();
        assert_eq!(create.status, SubtaskStatus::Cancelled);
        let assign = result
            .subtasks
            .iter()
            .find(|s| s.subtask_id == "asignar")
            .unwrap();
        assert_eq!(assign.status, SubtaskStatus::Failed);
    }

    #[tokio::test]
    async fn critical_failure_cancels_remaining_levels() {
        let fixture = Fixture::new();
        fixture.register("primera", false, false);
        fixture.register("nunca", false, false);
        fixture.script(Err(Error::Auth("tool returned 403 Forbidden".into())));
        let orchestrator = fixture.orchestrator();

        let result = orchestrator
            .execute(
                plan(vec![
                    vec![subtask("a", "primera")],
                    vec![subtask("b", "nunca")],
                ]),
                "conv-1",
                &CancelToken::new(),
            )
            .await;

        assert_eq!(result.failed_tasks, 1);
        assert_eq!(result.cancelled_tasks, 1);
        // The second level never invoked its action.
        assert_eq!(fixture.state.invocations.lock().len(), 1);
    }

    #[tokio::test]
    async fn rollback_happens_in_reverse_completion_order() {
        let mut fixture = Fixture::new();
        fixture.cfg.enable_parallel_execution = false;
        fixture.register("uno", false, true);
        fixture.register("dos", false, true);
        fixture.register("falla", false, false);
        fixture.script(Ok(serde_json::json!({"n": 1})));
        fixture.script(Ok(serde_json::json!({"n": 2})));
        fixture.script(Err(Error::Auth("tool returned 401".into())));
        let orchestrator = fixture.orchestrator();

        let result = orchestrator
            .execute(
                plan(vec![
                    vec![subtask("s1", "uno")],
                    vec![subtask("s2", "dos")],
                    vec![subtask("s3", "falla")],
                ]),
                "conv-1",
                &CancelToken::new(),
            )
            .await;

        assert_eq!(result.rolled_back, vec!["s2".to_string(), "s1".to_string()]);
        assert_eq!(
            *fixture.state.rollbacks.lock(),
            vec!["dos".to_string(), "uno".to_string()]
        );
    }

    #[tokio::test]
    async fn rollback_skips_incapable_actions() {
        let fixture = Fixture::new();
        fixture.register("capaz", false, true);
        fixture.register("incapaz", false, false);
        fixture.register("falla", false, false);
        fixture.script(Ok(serde_json::json!({"n": 1})));
        fixture.script(Ok(serde_json::json!({"n": 2})));
        fixture.script(Err(Error::Auth("tool returned 401".into())));
        let mut cfg_fixture = fixture;
        cfg_fixture.cfg.enable_parallel_execution = false;
        let orchestrator = cfg_fixture.orchestrator();

        let result = orchestrator
            .execute(
                plan(vec![
                    vec![subtask("s1", "capaz")],
                    vec![subtask("s2", "incapaz")],
                    vec![subtask("s3", "falla")],
                ]),
                "conv-1",
                &CancelToken::new(),
            )
            .await;

        // Only the rollback-capable action compensates; the other
        // completed subtask keeps its Completed status.
        assert_eq!(result.rolled_back, vec!["s1".to_string()]);
        let incapaz = result
            .subtasks
            .iter()
            .find(|s| s.subtask_id == "s2")
            .unwrap();
        assert_eq!(incapaz.status, SubtaskStatus::Completed);
    }

    #[tokio::test]
    async fn rollback_disabled_keeps_completed_work() {
        let mut fixture = Fixture::new();
        fixture.cfg.enable_rollback_on_failure = false;
        fixture.register("crear_github_issue", false, true);
        fixture.register("asignar_issue", false, false);
        fixture.script(Ok(serde_json::json!({"issue_id": 42})));
        fixture.script(Err(Error::Auth("tool returned 401".into())));
        let orchestrator = fixture.orchestrator();

        let result = orchestrator
            .execute(
                plan(vec![
                    vec![subtask("crear", "crear_github_issue")],
                    vec![subtask("asignar", "asignar_issue")],
                ]),
                "conv-1",
                &CancelToken::new(),
            )
            .await;

        assert!(result.rolled_back.is_empty());
        assert_eq!(result.completed_tasks, 1);
        assert!(fixture.state.rollbacks.lock().is_empty());
    }

    // ── timeout and cancellation ────────────────────────────────────

    #[tokio::test]
    async fn hung_action_times_out_and_halts() {
        let mut fixture = Fixture::new();
        fixture.cfg.task_timeout_seconds = 1;
        fixture.cfg.max_retries = 0;
        fixture.register_with_delay("colgada", true, false, Some(Duration::from_secs(5)));
        fixture.register("despues", true, false);
        let orchestrator = fixture.orchestrator();

        let result = orchestrator
            .execute(
                plan(vec![
                    vec![subtask("a", "colgada")],
                    vec![subtask("b", "despues")],
                ]),
                "conv-1",
                &CancelToken::new(),
            )
            .await;

        let hung = result.subtasks.iter().find(|s| s.subtask_id == "a").unwrap();
        assert_eq!(hung.status, SubtaskStatus::Timeout);
        let after = result.subtasks.iter().find(|s| s.subtask_id == "b").unwrap();
        assert_eq!(after.status, SubtaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancelled_request_cancels_all_subtasks() {
        let fixture = Fixture::new();
        fixture.register("accion", true, false);
        let orchestrator = fixture.orchestrator();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = orchestrator
            .execute(
                plan(vec![vec![subtask("a", "accion"), subtask("b", "accion")]]),
                "conv-1",
                &cancel,
            )
            .await;

        assert_eq!(result.cancelled_tasks, 2);
        assert!(!result.all_successful);
        assert!(fixture.state.invocations.lock().is_empty());
    }

    #[tokio::test]
    async fn empty_plan_is_trivially_successful() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let result = orchestrator
            .execute(plan(vec![]), "conv-1", &CancelToken::new())
            .await;
        assert!(result.all_successful);
        assert_eq!(result.total_tasks, 0);
    }
}
