use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mixture-of-Experts voting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for the multi-LLM voting engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoeConfig {
    /// Enable voting. When off, classification degrades to the primary
    /// LLM and a one-vote consensus.
    #[serde(default)]
    pub enabled: bool,
    /// Launch votes concurrently instead of one after another.
    #[serde(default = "d_true")]
    pub parallel_voting: bool,
    /// Per-vote timeout in milliseconds. A vote exceeding it is recorded
    /// as `Timeout` and does not count toward consensus.
    #[serde(default = "d_vote_timeout_ms")]
    pub timeout_per_vote_ms: u64,
    /// Consensus confidence below this falls back to single-LLM mode.
    #[serde(default = "d_consensus_threshold")]
    pub consensus_threshold: f64,
    /// Maximum debate rounds (1 = plain voting, no debate).
    #[serde(default = "d_max_debate_rounds")]
    pub max_debate_rounds: u32,
    /// Debate stops early when the round-over-round consensus confidence
    /// improvement drops below this.
    #[serde(default = "d_improvement_threshold")]
    pub debate_consensus_improvement_threshold: f64,
    /// The expert panel. Typically three participants.
    #[serde(default = "d_participants")]
    pub participants: Vec<ParticipantConfig>,
}

impl Default for MoeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            parallel_voting: true,
            timeout_per_vote_ms: d_vote_timeout_ms(),
            consensus_threshold: d_consensus_threshold(),
            max_debate_rounds: d_max_debate_rounds(),
            debate_consensus_improvement_threshold: d_improvement_threshold(),
            participants: d_participants(),
        }
    }
}

/// One expert in the voting panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantConfig {
    /// LLM provider id (must exist in `llm.providers`).
    pub llm_id: String,
    /// Role shaping the expert's prompt.
    pub role: ExpertRole,
    /// Vote weight in `[0, 1]`.
    #[serde(default = "d_weight")]
    pub weight: f64,
}

/// Expert roles, each with its own prompt framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpertRole {
    /// Literal interpretation of the utterance.
    Literalist,
    /// Reads the conversational context and history.
    Contextualist,
    /// Focuses on what actions the request implies.
    ActionPlanner,
}

impl ExpertRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpertRole::Literalist => "literalist",
            ExpertRole::Contextualist => "contextualist",
            ExpertRole::ActionPlanner => "action_planner",
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_vote_timeout_ms() -> u64 {
    15_000
}
fn d_consensus_threshold() -> f64 {
    0.5
}
fn d_max_debate_rounds() -> u32 {
    2
}
fn d_improvement_threshold() -> f64 {
    0.05
}
fn d_weight() -> f64 {
    1.0
}
fn d_participants() -> Vec<ParticipantConfig> {
    vec![
        ParticipantConfig {
            llm_id: "primary".into(),
            role: ExpertRole::Literalist,
            weight: 1.0,
        },
        ParticipantConfig {
            llm_id: "primary".into(),
            role: ExpertRole::Contextualist,
            weight: 0.9,
        },
        ParticipantConfig {
            llm_id: "primary".into(),
            role: ExpertRole::ActionPlanner,
            weight: 0.8,
        },
    ]
}
