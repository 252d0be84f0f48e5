mod catalog;
mod llm;
mod moe;
mod orchestrator;
mod rag;
mod sessions;
mod slots;

pub use catalog::*;
pub use llm::*;
pub use moe::*;
pub use orchestrator::*;
pub use rag::*;
pub use sessions::*;
pub use slots::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub moe: MoeConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub slot_filling: SlotFillingConfig,
    #[serde(default)]
    pub entities: EntityConfig,
    #[serde(default)]
    pub task_orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub progress_tracker: TrackerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Parse a config from TOML text.
    pub fn from_toml(text: &str) -> crate::error::Result<Self> {
        toml::from_str(text).map_err(|e| crate::error::Error::Config(e.to_string()))
    }

    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        // Warn when no LLM providers are configured.
        if self.llm.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.providers".into(),
                message: "no LLM providers configured".into(),
            });
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();
        for (i, provider) in self.llm.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].id"),
                    message: "provider id must not be empty".into(),
                });
            }
            if !provider.base_url.starts_with("http://")
                && !provider.base_url.starts_with("https://")
            {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].base_url"),
                    message: format!(
                        "base_url must start with http:// or https:// (got \"{}\")",
                        provider.base_url
                    ),
                });
            }
            if !provider.id.is_empty() && !seen_ids.insert(&provider.id) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("llm.providers[{i}].id"),
                    message: format!(
                        "duplicate provider id \"{}\" — later provider will shadow earlier one",
                        provider.id
                    ),
                });
            }
        }

        // Embedding dimension must be positive.
        if self.embedding.dimension == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "embedding.dimension".into(),
                message: "dimension must be greater than 0".into(),
            });
        }

        // The ten confidence weights must sum to 1.0.
        let weight_sum = self.rag.confidence.weights.sum();
        if (weight_sum - 1.0).abs() > 1e-6 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "rag.confidence.weights".into(),
                message: format!("weights must sum to 1.0 (got {weight_sum:.6})"),
            });
        }

        // Similarity floor and reduction factor.
        if !(0.0..=1.0).contains(&self.rag.retrieval.min_similarity) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "rag.retrieval.min_similarity".into(),
                message: "min_similarity must be within [0, 1]".into(),
            });
        }
        if self.rag.fallback.similarity_reduction_factor <= 0.0
            || self.rag.fallback.similarity_reduction_factor > 1.0
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "rag.fallback.similarity_reduction_factor".into(),
                message: "similarity_reduction_factor must be within (0, 1]".into(),
            });
        }

        // MoE participants must reference configured providers.
        if self.moe.enabled {
            if self.moe.participants.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "moe.participants".into(),
                    message: "voting requires at least one participant".into(),
                });
            }
            for (i, participant) in self.moe.participants.iter().enumerate() {
                if self.llm.provider(&participant.llm_id).is_none() {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("moe.participants[{i}].llm_id"),
                        message: format!(
                            "participant references unknown provider \"{}\"",
                            participant.llm_id
                        ),
                    });
                }
                if !(0.0..=1.0).contains(&participant.weight) {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("moe.participants[{i}].weight"),
                        message: "weight must be within [0, 1]".into(),
                    });
                }
            }
            if self.moe.max_debate_rounds == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "moe.max_debate_rounds".into(),
                    message: "max_debate_rounds must be at least 1".into(),
                });
            }
        }

        // Orchestrator bounds.
        if self.task_orchestrator.max_parallel_tasks == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "task_orchestrator.max_parallel_tasks".into(),
                message: "max_parallel_tasks must be greater than 0".into(),
            });
        }
        if self.task_orchestrator.max_subtasks == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "task_orchestrator.max_subtasks".into(),
                message: "max_subtasks must be greater than 0".into(),
            });
        }

        // Slot filling.
        if self.slot_filling.max_attempts == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "slot_filling.max_attempts".into(),
                message: "max_attempts must be at least 1".into(),
            });
        }

        // Sessions.
        if self.sessions.ttl_minutes == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.ttl_minutes".into(),
                message: "ttl_minutes must be greater than 0".into(),
            });
        }
        if self.sessions.cache_capacity == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.cache_capacity".into(),
                message: "cache_capacity must be greater than 0".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
