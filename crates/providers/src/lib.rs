//! External provider adapters: LLM completion, text embeddings, and the
//! speech interfaces the assistant consumes but does not implement.
//!
//! All adapters translate between our narrow internal contracts and the
//! wire format of the upstream HTTP APIs, with timeout and retry policy
//! from configuration.

pub mod embedding_http;
pub mod json;
pub mod llm_http;
pub mod retry;
pub mod speech;
pub mod testing;
pub mod traits;

pub use embedding_http::HttpEmbeddingProvider;
pub use llm_http::HttpLlmProvider;
pub use traits::{CompletionRequest, EmbeddingProvider, LlmProvider};
