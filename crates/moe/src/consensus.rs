//! Deterministic consensus aggregation.
//!
//! Given the same multiset of valid votes and the same configuration,
//! `calculate_consensus` always produces the same consensus: ties break
//! by weighted vote sum, then higher mean confidence, then ascending
//! intent id.

use std::collections::BTreeMap;

use mando_domain::entity::ExtractedEntity;
use mando_domain::subtask::Subtask;
use mando_domain::vote::{AgreementLevel, Consensus, ConsensusMethod, Vote};

/// Aggregate one round of votes.
pub fn calculate_consensus(votes: &[Vote], method: ConsensusMethod) -> Consensus {
    let valid: Vec<&Vote> = votes.iter().filter(|v| v.status.is_valid()).collect();
    let total_votes = votes.len();

    if valid.is_empty() {
        return Consensus::failed(total_votes, "no valid votes");
    }

    // Group by intent. BTreeMap gives deterministic iteration order for
    // the alphabetical tie-break.
    #[derive(Default)]
    struct Group {
        weight_sum: f64,
        confidence_sum: f64,
        count: usize,
    }
    let mut groups: BTreeMap<&str, Group> = BTreeMap::new();
    for vote in &valid {
        let group = groups.entry(vote.intent.as_str()).or_default();
        group.weight_sum += vote.weight;
        group.confidence_sum += vote.confidence;
        group.count += 1;
    }

    // Winner: greatest weighted sum; ties by higher mean confidence,
    // then by the BTreeMap's ascending intent order (first wins).
    let (winner, winner_count) = {
        let mut best: Option<(&str, f64, f64, usize)> = None;
        for (intent, group) in &groups {
            let mean_confidence = group.confidence_sum / group.count as f64;
            let better = match best {
                None => true,
                Some((_, best_weight, best_mean, _)) => {
                    group.weight_sum > best_weight
                        || (group.weight_sum == best_weight && mean_confidence > best_mean)
                }
            };
            if better {
                best = Some((intent, group.weight_sum, mean_confidence, group.count));
            }
        }
        let (intent, _, _, count) = best.expect("non-empty groups");
        (intent.to_owned(), count)
    };

    let all_singletons = groups.values().all(|g| g.count == 1);
    let agreement_level = agreement(groups.len(), winner_count, valid.len(), all_singletons);

    // Confidence: weighted mean of the winning votes.
    let winning: Vec<&&Vote> = valid.iter().filter(|v| v.intent == winner).collect();
    let weight_total: f64 = winning.iter().map(|v| v.weight).sum();
    let confidence = if weight_total > 0.0 {
        winning
            .iter()
            .map(|v| v.confidence * v.weight)
            .sum::<f64>()
            / weight_total
    } else {
        winning.iter().map(|v| v.confidence).sum::<f64>() / winning.len() as f64
    };

    let merged_entities = merge_entities(&winning);
    let merged_subtasks = merge_subtasks(&winning);

    let reasoning = format!(
        "{winner_count}/{} valid votes for {winner} ({})",
        valid.len(),
        agreement_level.as_str()
    );

    Consensus {
        final_intent: winner,
        confidence: confidence.clamp(0.0, 1.0),
        agreement_level,
        participating_votes: valid.len(),
        total_votes,
        method,
        merged_entities,
        merged_subtasks,
        reasoning,
    }
}

fn agreement(
    distinct: usize,
    winner_count: usize,
    valid: usize,
    all_singletons: bool,
) -> AgreementLevel {
    if distinct == 1 {
        AgreementLevel::Unanimous
    } else if winner_count * 2 > valid {
        AgreementLevel::Majority
    } else if all_singletons {
        // Every valid vote named a different intent.
        AgreementLevel::Split
    } else {
        // At most half the votes for the winner. This includes a
        // single-vote winner carried by weight past a multi-vote group:
        // the winner still holds the greatest weighted support.
        AgreementLevel::Plurality
    }
}

/// Merge entities across the winning votes; per entity type the
/// highest-confidence extraction wins, ties by the earlier vote.
fn merge_entities(winning: &[&&Vote]) -> Vec<ExtractedEntity> {
    let mut best: BTreeMap<&'static str, ExtractedEntity> = BTreeMap::new();
    for vote in winning {
        for entity in &vote.entities {
            let key = entity.entity_type.as_str();
            match best.get(key) {
                Some(existing) if existing.confidence >= entity.confidence => {}
                _ => {
                    best.insert(key, entity.clone());
                }
            }
        }
    }
    best.into_values().collect()
}

/// Union of proposed subtasks, deduplicated by canonical key.
fn merge_subtasks(winning: &[&&Vote]) -> Vec<Subtask> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();
    for vote in winning {
        for subtask in &vote.proposed_subtasks {
            if seen.insert(subtask.canonical_key()) {
                merged.push(subtask.clone());
            }
        }
    }
    merged
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
