//! Scripted providers for tests.
//!
//! Downstream crates drive the classifier, voter, and decomposer against
//! these instead of live endpoints.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;

use mando_domain::error::{Error, Result};

use crate::traits::{CompletionRequest, EmbeddingProvider, LlmProvider};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mock LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Scripted {
    Text(String),
    Fail(String),
}

/// An LLM returning scripted responses in order, then the default.
pub struct MockLlm {
    id: String,
    queue: Mutex<VecDeque<Scripted>>,
    default_response: String,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    pub fn new(id: impl Into<String>, default_response: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            queue: Mutex::new(VecDeque::new()),
            default_response: default_response.into(),
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue one scripted response.
    pub fn push_response(&self, text: impl Into<String>) -> &Self {
        self.queue.lock().push_back(Scripted::Text(text.into()));
        self
    }

    /// Queue one scripted failure.
    pub fn push_failure(&self, message: impl Into<String>) -> &Self {
        self.queue.lock().push_back(Scripted::Fail(message.into()));
        self
    }

    /// Sleep this long before every response (for timeout tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Prompts seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockLlm {
    async fn complete(&self, req: CompletionRequest) -> Result<String> {
        self.prompts.lock().push(req.prompt);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.queue.lock().pop_front() {
            Some(Scripted::Text(text)) => Ok(text),
            Some(Scripted::Fail(message)) => Err(Error::Provider {
                provider: self.id.clone(),
                message,
            }),
            None => Ok(self.default_response.clone()),
        }
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mock embedder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A deterministic embedder.
///
/// Texts registered via [`MockEmbedder::set`] return their fixed vector;
/// everything else hashes into a stable pseudo-vector. Identical texts
/// always embed identically.
pub struct MockEmbedder {
    dimension: usize,
    fixed: Mutex<HashMap<String, Vec<f32>>>,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fixed: Mutex::new(HashMap::new()),
        }
    }

    /// Register an exact vector for a text. Panics (test-only) when the
    /// dimension does not match.
    pub fn set(&self, text: impl Into<String>, vector: Vec<f32>) -> &Self {
        assert_eq!(vector.len(), self.dimension, "fixture vector dimension");
        self.fixed.lock().insert(text.into(), vector);
        self
    }

    fn hash_vector(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        let mut vector = Vec::with_capacity(self.dimension);
        for i in 0..self.dimension {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            (text, i).hash(&mut hasher);
            // Map the hash into [-1, 1].
            let unit = (hasher.finish() % 10_000) as f32 / 5_000.0 - 1.0;
            vector.push(unit);
        }
        vector
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(vector) = self.fixed.lock().get(text) {
            return Ok(vector.clone());
        }
        Ok(self.hash_vector(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_llm_scripted_then_default() {
        let llm = MockLlm::new("mock", "default");
        llm.push_response("first").push_failure("boom");

        assert_eq!(llm.complete(CompletionRequest::new("a")).await.unwrap(), "first");
        assert!(llm.complete(CompletionRequest::new("b")).await.is_err());
        assert_eq!(llm.complete(CompletionRequest::new("c")).await.unwrap(), "default");
        assert_eq!(llm.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn mock_embedder_is_deterministic() {
        let embedder = MockEmbedder::new(8);
        let a = embedder.embed("hola").await.unwrap();
        let b = embedder.embed("hola").await.unwrap();
        let c = embedder.embed("adios").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 8);
    }

    #[tokio::test]
    async fn mock_embedder_fixed_vectors_win() {
        let embedder = MockEmbedder::new(3);
        embedder.set("hola", vec![1.0, 0.0, 0.0]);
        assert_eq!(embedder.embed("hola").await.unwrap(), vec![1.0, 0.0, 0.0]);
    }
}
