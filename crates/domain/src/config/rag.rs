use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retrieval-augmented classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RagConfig {
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub confidence: ConfidenceConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
}

/// Example retrieval parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Default number of examples to retrieve when an intent does not
    /// override `max_rag_examples`.
    #[serde(default = "d_max_examples")]
    pub max_examples: usize,
    /// Cosine similarity floor. Candidates below it are discarded; when
    /// everything is below the floor the retrieval is empty.
    #[serde(default = "d_min_similarity")]
    pub min_similarity: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_examples: d_max_examples(),
            min_similarity: d_min_similarity(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Confidence scoring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Weighted-signal confidence scoring. The ten weights must sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    #[serde(default)]
    pub weights: ConfidenceWeights,
    /// Acceptance threshold for the primary classification.
    #[serde(default = "d_accept_threshold")]
    pub accept_threshold: f64,
    /// Fewer retrieved examples than this triggers a quality penalty.
    #[serde(default = "d_min_examples")]
    pub min_examples: usize,
    /// Classification latency above this (ms) triggers a quality penalty.
    #[serde(default = "d_max_latency_ms")]
    pub max_latency_ms: u64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            weights: ConfidenceWeights::default(),
            accept_threshold: d_accept_threshold(),
            min_examples: d_min_examples(),
            max_latency_ms: d_max_latency_ms(),
        }
    }
}

/// The ten signal weights of the final confidence score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    /// The model's self-reported confidence.
    #[serde(default = "d_w_llm")]
    pub llm_self: f64,
    /// Mean cosine similarity of the retrieved examples.
    #[serde(default = "d_w_similarity")]
    pub mean_similarity: f64,
    /// Fraction of retrieved examples sharing the chosen intent.
    #[serde(default = "d_w_consistency")]
    pub intent_consistency: f64,
    /// Retrieved count scaled against the requested k.
    #[serde(default = "d_w_count")]
    pub retrieval_count: f64,
    /// 1 − stddev of the retrieved similarities.
    #[serde(default = "d_w_diversity")]
    pub semantic_diversity: f64,
    /// Bucketed latency signal (faster is higher).
    #[serde(default = "d_w_temporal")]
    pub temporal: f64,
    /// 1 − stddev of the utterance embedding.
    #[serde(default = "d_w_embedding")]
    pub embedding_quality: f64,
    /// Normalized entropy of the similarity distribution.
    #[serde(default = "d_w_entropy")]
    pub similarity_entropy: f64,
    /// Presence of session context and example metadata.
    #[serde(default = "d_w_context")]
    pub contextual: f64,
    /// Utterance length and structure cues.
    #[serde(default = "d_w_robustness")]
    pub prompt_robustness: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            llm_self: d_w_llm(),
            mean_similarity: d_w_similarity(),
            intent_consistency: d_w_consistency(),
            retrieval_count: d_w_count(),
            semantic_diversity: d_w_diversity(),
            temporal: d_w_temporal(),
            embedding_quality: d_w_embedding(),
            similarity_entropy: d_w_entropy(),
            contextual: d_w_context(),
            prompt_robustness: d_w_robustness(),
        }
    }
}

impl ConfidenceWeights {
    /// Sum of all ten weights. Validation requires this to be 1.0.
    pub fn sum(&self) -> f64 {
        self.llm_self
            + self.mean_similarity
            + self.intent_consistency
            + self.retrieval_count
            + self.semantic_diversity
            + self.temporal
            + self.embedding_quality
            + self.similarity_entropy
            + self.contextual
            + self.prompt_robustness
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Graduated fallback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Graduated degradation when the primary classification is weak.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Master switch. When off, a weak classification is returned as-is.
    #[serde(default = "d_true")]
    pub enable_gradual_degradation: bool,
    /// Multiplier applied to the similarity floor at level 1.
    #[serde(default = "d_similarity_reduction")]
    pub similarity_reduction_factor: f64,
    /// A level's result is accepted when its confidence reaches this floor.
    #[serde(default = "d_degradation_floor")]
    pub min_confidence_for_degradation: f64,
    /// Per-level enable flags, index 0 = level 1.
    #[serde(default = "d_level_enables")]
    pub level_enabled: [bool; 5],
    /// Keyword → intent table for level 3, scored by earliest position
    /// and frequency.
    #[serde(default)]
    pub keyword_intents: HashMap<String, String>,
    /// Confidence assigned by the generic level-5 fallback.
    #[serde(default = "d_generic_confidence")]
    pub generic_confidence: f64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enable_gradual_degradation: true,
            similarity_reduction_factor: d_similarity_reduction(),
            min_confidence_for_degradation: d_degradation_floor(),
            level_enabled: d_level_enables(),
            keyword_intents: HashMap::new(),
            generic_confidence: d_generic_confidence(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_examples() -> usize {
    5
}
fn d_min_similarity() -> f64 {
    0.55
}
fn d_accept_threshold() -> f64 {
    0.3
}
fn d_min_examples() -> usize {
    2
}
fn d_max_latency_ms() -> u64 {
    4_000
}
fn d_w_llm() -> f64 {
    0.30
}
fn d_w_similarity() -> f64 {
    0.20
}
fn d_w_consistency() -> f64 {
    0.15
}
fn d_w_count() -> f64 {
    0.05
}
fn d_w_diversity() -> f64 {
    0.05
}
fn d_w_temporal() -> f64 {
    0.05
}
fn d_w_embedding() -> f64 {
    0.05
}
fn d_w_entropy() -> f64 {
    0.05
}
fn d_w_context() -> f64 {
    0.05
}
fn d_w_robustness() -> f64 {
    0.05
}
fn d_true() -> bool {
    true
}
fn d_similarity_reduction() -> f64 {
    0.7
}
fn d_degradation_floor() -> f64 {
    0.3
}
fn d_level_enables() -> [bool; 5] {
    [true; 5]
}
fn d_generic_confidence() -> f64 {
    0.1
}
