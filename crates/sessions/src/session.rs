//! Session and turn records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mando_domain::error::{Error, Result};

use crate::context::Context;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Active,
    /// A follow-up question is pending.
    Waiting,
    Completed,
    Expired,
    Cancelled,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One user/assistant exchange. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Monotonically increasing within the session, starting at 1.
    pub turn_id: u64,
    pub user_text: String,
    pub assistant_text: String,
    #[serde(default)]
    pub intent_id: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Slot values at the end of the turn.
    #[serde(default)]
    pub slots_snapshot: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One conversational session. Owns its turns and context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Idle TTL in minutes; renewed on activity.
    pub ttl_minutes: u32,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub context: Context,
    #[serde(default)]
    pub total_turns: u64,
    #[serde(default)]
    pub successful_turns: u64,
    /// Retained context snapshot version numbers, oldest first.
    #[serde(default)]
    pub context_versions: Vec<u64>,
    /// Next snapshot version number to assign.
    #[serde(default)]
    pub next_context_version: u64,
}

impl Session {
    pub fn new(user_id: impl Into<String>, ttl_minutes: u32) -> Self {
        let now = Utc::now();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            state: SessionState::Active,
            created_at: now,
            last_activity_at: now,
            ttl_minutes,
            turns: Vec::new(),
            context: Context::default(),
            total_turns: 0,
            successful_turns: 0,
            context_versions: Vec::new(),
            next_context_version: 0,
        }
    }

    /// The next turn id (1-based, strictly increasing).
    pub fn next_turn_id(&self) -> u64 {
        self.turns.last().map(|t| t.turn_id).unwrap_or(0) + 1
    }

    /// Append a turn, enforcing the monotonic turn-id invariant.
    pub fn append_turn(&mut self, turn: Turn) -> Result<()> {
        if let Some(last) = self.turns.last() {
            if turn.turn_id <= last.turn_id {
                return Err(Error::Invariant(format!(
                    "turn id {} not greater than last {}",
                    turn.turn_id, last.turn_id
                )));
            }
        }
        self.last_activity_at = turn.created_at;
        self.total_turns += 1;
        self.turns.push(turn);
        Ok(())
    }

    /// Whether the idle TTL elapsed as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_activity_at >= chrono::Duration::minutes(self.ttl_minutes as i64)
    }

    /// Refresh the activity timestamp.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
    }

    /// Turns newer than the compaction window (most recent `window`).
    pub fn recent_turns(&self, window: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(window);
        &self.turns[start..]
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
