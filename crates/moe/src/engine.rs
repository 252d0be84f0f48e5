//! Voting engine: rounds, debate, and single-LLM degradation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;

use mando_catalog::IntentCatalog;
use mando_domain::cancel::CancelToken;
use mando_domain::config::{ExpertRole, MoeConfig, ParticipantConfig};
use mando_domain::intent::HELP_INTENT;
use mando_domain::trace::TraceEvent;
use mando_domain::vote::{AgreementLevel, Consensus, ConsensusMethod, Vote, VotingRound};
use mando_providers::traits::LlmProvider;
use mando_sessions::Context;

use crate::consensus::calculate_consensus;
use crate::experts::{cast_vote, Expert, VoteRequest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct VotingEngine {
    cfg: MoeConfig,
    experts: Vec<Expert>,
    /// Provider for single-LLM degradation (voting disabled, failed or
    /// weak consensus, help-intent winner).
    primary: Arc<dyn LlmProvider>,
}

impl VotingEngine {
    pub fn new(cfg: MoeConfig, experts: Vec<Expert>, primary: Arc<dyn LlmProvider>) -> Self {
        Self {
            cfg,
            experts,
            primary,
        }
    }

    pub fn config(&self) -> &MoeConfig {
        &self.cfg
    }

    /// Run a voting round (with debate when configured) for one request.
    ///
    /// Never errors: an unusable outcome is a round whose consensus is
    /// Failed.
    pub async fn run(
        &self,
        request_id: &str,
        utterance: &str,
        context: &Context,
        catalog: &IntentCatalog,
        cancel: &CancelToken,
    ) -> VotingRound {
        let started_at = Utc::now();
        let intent_ids = catalog.intent_ids();
        let summary = (!context.conversation_summary.is_empty())
            .then_some(context.conversation_summary.as_str());

        if !self.cfg.enabled || self.experts.is_empty() {
            let (votes, consensus) = self
                .single_llm_vote(utterance, summary, &intent_ids, cancel)
                .await;
            return VotingRound {
                request_id: request_id.to_owned(),
                round: 1,
                votes,
                consensus,
                started_at,
                finished_at: Utc::now(),
            };
        }

        let timeout = Duration::from_millis(self.cfg.timeout_per_vote_ms);
        let mut prior_votes: Vec<Vote> = Vec::new();
        let mut last: Option<(u32, Vec<Vote>, Consensus)> = None;

        for round in 1..=self.cfg.max_debate_rounds {
            if cancel.is_cancelled() {
                break;
            }

            let request = VoteRequest {
                utterance,
                conversation_summary: summary,
                intent_ids: &intent_ids,
                prior_votes: &prior_votes,
            };

            let votes = if self.cfg.parallel_voting {
                join_all(
                    self.experts
                        .iter()
                        .map(|expert| cast_vote(expert, &request, timeout, cancel)),
                )
                .await
            } else {
                let mut votes = Vec::with_capacity(self.experts.len());
                for expert in &self.experts {
                    votes.push(cast_vote(expert, &request, timeout, cancel).await);
                }
                votes
            };

            let method = if round == 1 {
                ConsensusMethod::WeightedVote
            } else {
                ConsensusMethod::Debate
            };
            let consensus = calculate_consensus(&votes, method);

            TraceEvent::ConsensusReached {
                intent: consensus.final_intent.clone(),
                agreement: consensus.agreement_level.as_str().into(),
                confidence: consensus.confidence,
                round,
                valid_votes: consensus.participating_votes,
            }
            .emit();

            let unanimous = consensus.agreement_level == AgreementLevel::Unanimous;
            let improvement = last
                .as_ref()
                .map(|(_, _, prev)| consensus.confidence - prev.confidence);

            prior_votes = votes.clone();
            last = Some((round, votes, consensus));

            if unanimous {
                break;
            }
            if let Some(improvement) = improvement {
                if improvement < self.cfg.debate_consensus_improvement_threshold {
                    break;
                }
            }
        }

        let (round, mut votes, mut consensus) = match last {
            Some(state) => state,
            // Cancelled before the first round completed.
            None => (
                0,
                Vec::new(),
                Consensus::failed(0, "cancelled before voting"),
            ),
        };

        // Degrade to single-LLM mode when the panel's answer is unusable:
        // failed consensus, confidence below the floor, or a help-intent
        // winner (the panel is effectively saying "no idea").
        let unusable = consensus.agreement_level == AgreementLevel::Failed
            || consensus.confidence < self.cfg.consensus_threshold
            || consensus.final_intent == HELP_INTENT;
        if unusable && !cancel.is_cancelled() {
            tracing::debug!(
                intent = %consensus.final_intent,
                confidence = consensus.confidence,
                agreement = consensus.agreement_level.as_str(),
                "consensus unusable, degrading to single-LLM mode"
            );
            let (single_votes, single_consensus) = self
                .single_llm_vote(utterance, summary, &intent_ids, cancel)
                .await;
            if single_consensus.agreement_level != AgreementLevel::Failed {
                votes = single_votes;
                consensus = single_consensus;
            }
        }

        VotingRound {
            request_id: request_id.to_owned(),
            round,
            votes,
            consensus,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// One-vote round through the primary provider.
    async fn single_llm_vote(
        &self,
        utterance: &str,
        conversation_summary: Option<&str>,
        intent_ids: &[&str],
        cancel: &CancelToken,
    ) -> (Vec<Vote>, Consensus) {
        let expert = Expert {
            cfg: ParticipantConfig {
                llm_id: self.primary.provider_id().to_owned(),
                role: ExpertRole::Literalist,
                weight: 1.0,
            },
            llm: self.primary.clone(),
        };
        let request = VoteRequest {
            utterance,
            conversation_summary,
            intent_ids,
            prior_votes: &[],
        };
        let timeout = Duration::from_millis(self.cfg.timeout_per_vote_ms);

        let vote = cast_vote(&expert, &request, timeout, cancel).await;
        let votes = vec![vote];
        let consensus = calculate_consensus(&votes, ConsensusMethod::SingleLlm);
        (votes, consensus)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
