use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slot filling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Slot-filling dialog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotFillingConfig {
    /// Generate follow-up questions with the LLM when the intent has no
    /// template for the missing slot.
    #[serde(default = "d_true")]
    pub enable_dynamic_questions: bool,
    /// Questions asked per slot before abandoning with an apology.
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    /// Extracted entities below this confidence do not fill slots.
    #[serde(default = "d_confidence_threshold")]
    pub confidence_threshold: f64,
}

impl Default for SlotFillingConfig {
    fn default() -> Self {
        Self {
            enable_dynamic_questions: true,
            max_attempts: d_max_attempts(),
            confidence_threshold: d_confidence_threshold(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entity extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Entity recognizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Merged extractions below this confidence are discarded.
    #[serde(default = "d_entity_floor")]
    pub confidence_floor: f64,
    /// Run the LLM extraction strategy (pattern and context always run).
    #[serde(default = "d_true")]
    pub enable_llm_extraction: bool,
    /// Ask the LLM to sanity-check validated entities and adjust
    /// confidence.
    #[serde(default)]
    pub enable_semantic_check: bool,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            confidence_floor: d_entity_floor(),
            enable_llm_extraction: true,
            enable_semantic_check: false,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_max_attempts() -> u32 {
    3
}
fn d_confidence_threshold() -> f64 {
    0.5
}
fn d_entity_floor() -> f64 {
    0.4
}
