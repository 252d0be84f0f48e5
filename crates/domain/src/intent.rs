use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::entity::ExtractedEntity;

/// Intent id of the generic help fallback. Classification that cannot do
/// better degrades to this, and the user receives a clarification prompt.
pub const HELP_INTENT: &str = "ayuda";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Intent definition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One intent in the declarative catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentDefinition {
    /// Unique intent id (e.g. `"encender_luz"`).
    pub intent_id: String,
    /// Human-readable description shown to the classifier LLM.
    pub description: String,
    /// Expert-domain tag (e.g. `"smart_home"`, `"media"`).
    #[serde(default)]
    pub expert_domain: String,
    /// Example utterances used as the RAG corpus.
    #[serde(default)]
    pub examples: Vec<String>,
    /// Slots that must be filled before execution.
    #[serde(default)]
    pub required_slots: Vec<String>,
    #[serde(default)]
    pub optional_slots: Vec<String>,
    /// Per-slot follow-up question templates. `{slot}` interpolates the
    /// slot name.
    #[serde(default)]
    pub slot_prompts: HashMap<String, String>,
    /// Tool action executed when the intent's slots are complete.
    #[serde(default)]
    pub tool_action_id: Option<String>,
    /// Classification acceptance threshold. `None` takes the catalogue
    /// default.
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
    /// RAG example count. `None` takes the retrieval default.
    #[serde(default)]
    pub max_rag_examples: Option<usize>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classification result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fallback level recorded on a classification. `None` means the primary
/// classifier succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackLevel {
    #[default]
    None,
    ReducedSimilarity,
    GeneralHeuristics,
    KeywordMapping,
    ContextAnalysis,
    Generic,
}

impl FallbackLevel {
    /// The numeric level (0 when no fallback was used).
    pub fn as_u8(self) -> u8 {
        match self {
            FallbackLevel::None => 0,
            FallbackLevel::ReducedSimilarity => 1,
            FallbackLevel::GeneralHeuristics => 2,
            FallbackLevel::KeywordMapping => 3,
            FallbackLevel::ContextAnalysis => 4,
            FallbackLevel::Generic => 5,
        }
    }

    pub fn from_u8(level: u8) -> Option<Self> {
        match level {
            0 => Some(FallbackLevel::None),
            1 => Some(FallbackLevel::ReducedSimilarity),
            2 => Some(FallbackLevel::GeneralHeuristics),
            3 => Some(FallbackLevel::KeywordMapping),
            4 => Some(FallbackLevel::ContextAnalysis),
            5 => Some(FallbackLevel::Generic),
            _ => None,
        }
    }
}

/// Outcome of classifying one utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub intent_id: String,
    /// Final confidence in `[0, 1]` after weighted scoring.
    pub confidence: f64,
    /// Doc ids of the retrieved examples that informed the decision.
    #[serde(default)]
    pub examples_used: Vec<String>,
    /// Entities the classifier extracted alongside the intent.
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub fallback_level: FallbackLevel,
    /// Why this intent was chosen (model reasoning or fallback reason).
    #[serde(default)]
    pub reasoning: String,
    pub latency_ms: u64,
}

impl ClassificationResult {
    /// A help-intent result carrying a fallback reason.
    pub fn help(level: FallbackLevel, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            intent_id: HELP_INTENT.to_owned(),
            confidence,
            examples_used: Vec::new(),
            entities: Vec::new(),
            fallback_level: level,
            reasoning: reasoning.into(),
            latency_ms: 0,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
