//! Vector store contract.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mando_domain::error::Result;

/// One embedded example document in the RAG corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingDocument {
    pub doc_id: String,
    /// The example utterance text.
    pub content: String,
    /// Intent label of the example.
    pub intent_id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Write timestamp; concurrent writers resolve last-write-wins.
    pub updated_at: DateTime<Utc>,
}

impl EmbeddingDocument {
    pub fn new(
        doc_id: impl Into<String>,
        content: impl Into<String>,
        intent_id: impl Into<String>,
        vector: Vec<f32>,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            content: content.into(),
            intent_id: intent_id.into(),
            vector,
            metadata: HashMap::new(),
            updated_at: Utc::now(),
        }
    }
}

/// One search result: a document and its cosine similarity to the query.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub doc: EmbeddingDocument,
    pub similarity: f32,
}

/// Polymorphic vector store (in-memory or remote).
///
/// Invariants: every stored vector has the store's configured dimension
/// (mismatches are rejected at upsert and at query), and `search_top_k`
/// returns hits sorted by descending similarity. When every candidate
/// falls below `min_similarity` the result is empty.
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace a document. Replacement is last-write-wins by
    /// `updated_at`.
    async fn upsert(&self, doc: EmbeddingDocument) -> Result<()>;

    async fn delete(&self, doc_id: &str) -> Result<()>;

    async fn get(&self, doc_id: &str) -> Result<Option<EmbeddingDocument>>;

    async fn search_top_k(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: Option<f32>,
    ) -> Result<Vec<SearchHit>>;

    /// Number of stored documents.
    async fn len(&self) -> Result<usize>;

    /// The dimension every vector must have.
    fn dimension(&self) -> usize;
}
