//! Weighted-signal confidence scoring.
//!
//! The final confidence is a weighted combination of ten signals
//! (weights from configuration, summing to 1.0), multiplied by a quality
//! factor that penalizes thin retrieval, slow classification, and
//! fallback use. Every returned value lies in `[0, 1]`.

use mando_domain::config::ConfidenceConfig;
use mando_index::math::{mean, normalized_entropy, stddev};
use mando_index::SearchHit;

/// The ten raw signals, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceSignals {
    pub llm_self: f64,
    pub mean_similarity: f64,
    pub intent_consistency: f64,
    pub retrieval_count: f64,
    pub semantic_diversity: f64,
    pub temporal: f64,
    pub embedding_quality: f64,
    pub similarity_entropy: f64,
    pub contextual: f64,
    pub prompt_robustness: f64,
}

/// Compute the ten signals for one classification.
#[allow(clippy::too_many_arguments)]
pub fn compute_signals(
    llm_confidence: f64,
    hits: &[SearchHit],
    chosen_intent: &str,
    requested_k: usize,
    latency_ms: u64,
    embedding: &[f32],
    has_session_context: bool,
    utterance: &str,
) -> ConfidenceSignals {
    let similarities: Vec<f32> = hits.iter().map(|h| h.similarity).collect();

    let intent_consistency = if hits.is_empty() {
        0.0
    } else {
        hits.iter()
            .filter(|h| h.doc.intent_id == chosen_intent)
            .count() as f64
            / hits.len() as f64
    };

    let retrieval_count = if requested_k == 0 {
        0.0
    } else {
        (hits.len() as f64 / requested_k as f64).min(1.0)
    };

    let has_metadata = hits.iter().any(|h| !h.doc.metadata.is_empty());
    let contextual = 0.5
        + if has_session_context { 0.25 } else { 0.0 }
        + if has_metadata { 0.25 } else { 0.0 };

    ConfidenceSignals {
        llm_self: llm_confidence.clamp(0.0, 1.0),
        mean_similarity: (mean(&similarities) as f64).clamp(0.0, 1.0),
        intent_consistency,
        retrieval_count,
        semantic_diversity: (1.0 - stddev(&similarities) as f64).clamp(0.0, 1.0),
        temporal: temporal_signal(latency_ms),
        embedding_quality: (1.0 - stddev(embedding) as f64).clamp(0.0, 1.0),
        similarity_entropy: (normalized_entropy(&similarities) as f64).clamp(0.0, 1.0),
        contextual,
        prompt_robustness: robustness_signal(utterance),
    }
}

/// Bucketed latency signal: faster classifications score higher.
fn temporal_signal(latency_ms: u64) -> f64 {
    match latency_ms {
        0..=500 => 1.0,
        501..=1000 => 0.9,
        1001..=2000 => 0.75,
        2001..=4000 => 0.5,
        _ => 0.25,
    }
}

/// Utterance length and structure cues.
///
/// Very short or very long utterances classify less reliably; a
/// question mark or a verb-initial imperative reads as well-formed.
fn robustness_signal(utterance: &str) -> f64 {
    let words = utterance.split_whitespace().count();
    let length_score: f64 = match words {
        0 => 0.0,
        1..=2 => 0.5,
        3..=20 => 1.0,
        21..=40 => 0.7,
        _ => 0.4,
    };
    let structure_bonus: f64 = if utterance.contains('?') || utterance.contains('¿') {
        0.1
    } else {
        0.0
    };
    (length_score + structure_bonus).min(1.0)
}

/// Weighted combination of the ten signals.
pub fn weighted_score(signals: &ConfidenceSignals, cfg: &ConfidenceConfig) -> f64 {
    let w = &cfg.weights;
    let score = signals.llm_self * w.llm_self
        + signals.mean_similarity * w.mean_similarity
        + signals.intent_consistency * w.intent_consistency
        + signals.retrieval_count * w.retrieval_count
        + signals.semantic_diversity * w.semantic_diversity
        + signals.temporal * w.temporal
        + signals.embedding_quality * w.embedding_quality
        + signals.similarity_entropy * w.similarity_entropy
        + signals.contextual * w.contextual
        + signals.prompt_robustness * w.prompt_robustness;
    score.clamp(0.0, 1.0)
}

/// Multiplicative quality factor.
///
/// Penalizes: fewer retrieved examples than `min_examples` (×0.8),
/// latency above `max_latency_ms` (×0.85), and any fallback use (×0.8 —
/// this is the fallback's 20 % confidence penalty).
pub fn quality_factor(
    retrieved: usize,
    latency_ms: u64,
    fallback_used: bool,
    cfg: &ConfidenceConfig,
) -> f64 {
    let mut factor = 1.0;
    if retrieved < cfg.min_examples {
        factor *= 0.8;
    }
    if latency_ms > cfg.max_latency_ms {
        factor *= 0.85;
    }
    if fallback_used {
        factor *= 0.8;
    }
    factor
}

/// Final confidence: weighted score × quality factor, clamped to [0, 1].
pub fn final_confidence(
    signals: &ConfidenceSignals,
    retrieved: usize,
    latency_ms: u64,
    fallback_used: bool,
    cfg: &ConfidenceConfig,
) -> f64 {
    (weighted_score(signals, cfg) * quality_factor(retrieved, latency_ms, fallback_used, cfg))
        .clamp(0.0, 1.0)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
