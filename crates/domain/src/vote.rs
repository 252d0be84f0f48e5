use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ExpertRole;
use crate::entity::ExtractedEntity;
use crate::subtask::Subtask;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vote
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteStatus {
    InProgress,
    Completed,
    Failed,
    Timeout,
}

impl VoteStatus {
    /// Whether the vote counts toward consensus.
    pub fn is_valid(self) -> bool {
        self == VoteStatus::Completed
    }
}

/// One expert's structured answer in a voting round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub vote_id: String,
    pub llm_id: String,
    pub role: ExpertRole,
    /// Vote weight in `[0, 1]`.
    pub weight: f64,
    pub intent: String,
    pub confidence: f64,
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub proposed_subtasks: Vec<Subtask>,
    #[serde(default)]
    pub reasoning: String,
    pub status: VoteStatus,
    pub duration_ms: u64,
}

impl Vote {
    /// A failed vote record (error, timeout, unparsable output, cancel).
    pub fn failed(
        llm_id: impl Into<String>,
        role: ExpertRole,
        weight: f64,
        status: VoteStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            vote_id: uuid::Uuid::new_v4().to_string(),
            llm_id: llm_id.into(),
            role,
            weight,
            intent: String::new(),
            confidence: 0.0,
            entities: Vec::new(),
            proposed_subtasks: Vec::new(),
            reasoning: reason.into(),
            status,
            duration_ms: 0,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Consensus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementLevel {
    Unanimous,
    Majority,
    Plurality,
    Split,
    Failed,
}

impl AgreementLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unanimous => "unanimous",
            Self::Majority => "majority",
            Self::Plurality => "plurality",
            Self::Split => "split",
            Self::Failed => "failed",
        }
    }
}

/// How a consensus was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMethod {
    WeightedVote,
    SingleLlm,
    Debate,
}

/// Aggregated decision of one voting round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consensus {
    pub final_intent: String,
    /// Weighted mean of the winning votes' confidences.
    pub confidence: f64,
    pub agreement_level: AgreementLevel,
    /// Valid (Completed) votes that participated.
    pub participating_votes: usize,
    pub total_votes: usize,
    pub method: ConsensusMethod,
    #[serde(default)]
    pub merged_entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub merged_subtasks: Vec<Subtask>,
    #[serde(default)]
    pub reasoning: String,
}

impl Consensus {
    /// The failed consensus (no valid votes).
    pub fn failed(total_votes: usize, reasoning: impl Into<String>) -> Self {
        Self {
            final_intent: String::new(),
            confidence: 0.0,
            agreement_level: AgreementLevel::Failed,
            participating_votes: 0,
            total_votes,
            method: ConsensusMethod::WeightedVote,
            merged_entities: Vec::new(),
            merged_subtasks: Vec::new(),
            reasoning: reasoning.into(),
        }
    }
}

/// One complete voting round (possibly one of several debate rounds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingRound {
    pub request_id: String,
    pub round: u32,
    pub votes: Vec<Vote>,
    pub consensus: Consensus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_completed_votes_are_valid() {
        assert!(VoteStatus::Completed.is_valid());
        assert!(!VoteStatus::InProgress.is_valid());
        assert!(!VoteStatus::Failed.is_valid());
        assert!(!VoteStatus::Timeout.is_valid());
    }

    #[test]
    fn failed_vote_has_zero_confidence() {
        let vote = Vote::failed("primary", ExpertRole::Literalist, 0.9, VoteStatus::Timeout, "deadline");
        assert_eq!(vote.status, VoteStatus::Timeout);
        assert_eq!(vote.confidence, 0.0);
        assert!(vote.intent.is_empty());
        assert_eq!(vote.reasoning, "deadline");
    }

    #[test]
    fn failed_consensus_shape() {
        let consensus = Consensus::failed(3, "all votes failed");
        assert_eq!(consensus.agreement_level, AgreementLevel::Failed);
        assert_eq!(consensus.participating_votes, 0);
        assert_eq!(consensus.total_votes, 3);
    }

    #[test]
    fn consensus_serde_roundtrip() {
        let consensus = Consensus {
            final_intent: "reproducir_musica".into(),
            confidence: 0.82,
            agreement_level: AgreementLevel::Majority,
            participating_votes: 2,
            total_votes: 3,
            method: ConsensusMethod::WeightedVote,
            merged_entities: Vec::new(),
            merged_subtasks: Vec::new(),
            reasoning: "2/3 agree".into(),
        };
        let json = serde_json::to_string(&consensus).unwrap();
        let back: Consensus = serde_json::from_str(&json).unwrap();
        assert_eq!(back.final_intent, "reproducir_musica");
        assert_eq!(back.agreement_level, AgreementLevel::Majority);
        assert_eq!(back.method, ConsensusMethod::WeightedVote);
    }
}
