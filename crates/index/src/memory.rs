//! In-memory vector store.

use std::collections::HashMap;

use parking_lot::RwLock;

use mando_domain::error::{Error, Result};

use crate::math::cosine_similarity;
use crate::store::{EmbeddingDocument, SearchHit, VectorStore};

/// In-process store backing tests and single-node deployments.
///
/// Concurrent readers share the lock; writers to the same doc resolve
/// last-write-wins by the document timestamp.
pub struct InMemoryVectorStore {
    dimension: usize,
    docs: RwLock<HashMap<String, EmbeddingDocument>>,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            docs: RwLock::new(HashMap::new()),
        }
    }

    fn check_dimension(&self, len: usize, what: &str) -> Result<()> {
        if len != self.dimension {
            return Err(Error::Invariant(format!(
                "{what} dimension {len} does not match configured {}",
                self.dimension
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, doc: EmbeddingDocument) -> Result<()> {
        self.check_dimension(doc.vector.len(), "upsert vector")?;

        let mut docs = self.docs.write();
        match docs.get(&doc.doc_id) {
            // Last-write-wins: an older timestamp never replaces a newer one.
            Some(existing) if existing.updated_at > doc.updated_at => Ok(()),
            _ => {
                docs.insert(doc.doc_id.clone(), doc);
                Ok(())
            }
        }
    }

    async fn delete(&self, doc_id: &str) -> Result<()> {
        self.docs.write().remove(doc_id);
        Ok(())
    }

    async fn get(&self, doc_id: &str) -> Result<Option<EmbeddingDocument>> {
        Ok(self.docs.read().get(doc_id).cloned())
    }

    async fn search_top_k(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        self.check_dimension(query.len(), "query vector")?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let docs = self.docs.read();
        let mut hits: Vec<SearchHit> = docs
            .values()
            .map(|doc| SearchHit {
                similarity: cosine_similarity(query, &doc.vector),
                doc: doc.clone(),
            })
            .filter(|hit| min_similarity.is_none_or(|floor| hit.similarity >= floor))
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc.doc_id.cmp(&b.doc.doc_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.docs.read().len())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
