use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// LLM provider pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    /// Configured providers. The first entry is the primary model used
    /// for single-LLM classification and question generation.
    #[serde(default)]
    pub providers: Vec<LlmProviderConfig>,
}

impl LlmConfig {
    /// The primary provider (first configured), if any.
    pub fn primary(&self) -> Option<&LlmProviderConfig> {
        self.providers.first()
    }

    /// Look up a provider by id.
    pub fn provider(&self, id: &str) -> Option<&LlmProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }
}

/// One LLM endpoint the assistant may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    /// Unique provider id (referenced by MoE participants).
    pub id: String,
    /// Base URL of the completion endpoint.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Environment variable holding the API key. Unset means no auth header.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Sampling temperature.
    #[serde(default = "d_temperature")]
    pub temperature: f64,
    /// Maximum tokens per completion.
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    /// Request timeout in milliseconds.
    #[serde(default = "d_llm_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries on transient failures.
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Embedding provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Embedding endpoint configuration. All vectors in the index must match
/// `dimension`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding endpoint.
    #[serde(default = "d_embedding_url")]
    pub base_url: String,
    /// Model identifier.
    #[serde(default = "d_embedding_model")]
    pub model: String,
    /// Vector dimension the index is configured for.
    #[serde(default = "d_dimension")]
    pub dimension: usize,
    /// Request timeout in milliseconds.
    #[serde(default = "d_embedding_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries on transient failures.
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: d_embedding_url(),
            model: d_embedding_model(),
            dimension: d_dimension(),
            timeout_ms: d_embedding_timeout_ms(),
            max_retries: d_max_retries(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_temperature() -> f64 {
    0.2
}
fn d_max_tokens() -> u32 {
    1024
}
fn d_llm_timeout_ms() -> u64 {
    30_000
}
fn d_max_retries() -> u32 {
    2
}
fn d_embedding_url() -> String {
    "http://localhost:11434".into()
}
fn d_embedding_model() -> String {
    "nomic-embed-text".into()
}
fn d_dimension() -> usize {
    768
}
fn d_embedding_timeout_ms() -> u64 {
    5_000
}
