use serde::Serialize;

/// Structured trace events emitted across all Mando crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionResolved {
        session_id: String,
        user_id: String,
        is_new: bool,
    },
    SessionExpired {
        session_id: String,
        idle_minutes: i64,
    },
    ContextCompacted {
        session_id: String,
        compression_level: u32,
        turns_folded: usize,
    },
    CatalogReloaded {
        version: String,
        intents: usize,
    },
    CatalogReloadRejected {
        reason: String,
    },
    ClassificationCompleted {
        intent: String,
        confidence: f64,
        examples_used: usize,
        fallback_level: u8,
        duration_ms: u64,
    },
    FallbackLevelAccepted {
        level: u8,
        intent: String,
        confidence: f64,
        reason: String,
    },
    VoteCast {
        llm_id: String,
        role: String,
        intent: String,
        confidence: f64,
        duration_ms: u64,
    },
    VoteFailed {
        llm_id: String,
        reason: String,
    },
    ConsensusReached {
        intent: String,
        agreement: String,
        confidence: f64,
        round: u32,
        valid_votes: usize,
    },
    SlotQuestionAsked {
        intent: String,
        slot: String,
        attempt: u32,
    },
    SlotAbandoned {
        intent: String,
        slot: String,
        attempts: u32,
    },
    SubtaskTerminal {
        subtask_id: String,
        action: String,
        status: String,
        duration_ms: u64,
        retries: u32,
    },
    RollbackStarted {
        execution_id: String,
        completed_subtasks: usize,
    },
    RollbackFinished {
        execution_id: String,
        rolled_back: usize,
    },
    ExecutionFinished {
        execution_id: String,
        total: usize,
        completed: usize,
        failed: usize,
        duration_ms: u64,
    },
    ProviderCall {
        provider: String,
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "mando_event");
    }
}
