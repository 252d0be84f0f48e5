//! Remote vector store over HTTP.
//!
//! Wire contract, per collection:
//!   PUT    /collections/{name}                  — create
//!   POST   /collections/{name}/docs             — upsert
//!   POST   /collections/{name}/search           — `{vector, k, min_similarity}` → `{hits: [{doc, similarity}]}`
//!   GET    /collections/{name}/docs/{id}        — fetch
//!   DELETE /collections/{name}/docs/{id}        — delete

use serde::Deserialize;

use mando_domain::error::{Error, Result};

use crate::store::{EmbeddingDocument, SearchHit, VectorStore};

pub struct RemoteVectorStore {
    http: reqwest::Client,
    base_url: String,
    collection: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Vec<RemoteHit>,
}

#[derive(Deserialize)]
struct RemoteHit {
    doc: EmbeddingDocument,
    similarity: f32,
}

#[derive(Deserialize)]
struct CountResponse {
    count: usize,
}

impl RemoteVectorStore {
    pub fn new(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        dimension: usize,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            collection: collection.into(),
            dimension,
        })
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{suffix}", self.base_url, self.collection)
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

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::Provider {
            provider: "vector-store".into(),
            message: format!("HTTP {}: {body}", status.as_u16()),
        })
    }

    /// Create the collection if it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<()> {
        let resp = self
            .http
            .put(self.url(""))
            .json(&serde_json::json!({ "dimension": self.dimension }))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Self::check_status(resp).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl VectorStore for RemoteVectorStore {
    async fn upsert(&self, doc: EmbeddingDocument) -> Result<()> {
        self.check_dimension(doc.vector.len(), "upsert vector")?;
        let resp = self
            .http
            .post(self.url("/docs"))
            .json(&doc)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Self::check_status(resp).await?;
        Ok(())
    }

    async fn delete(&self, doc_id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/docs/{doc_id}")))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Self::check_status(resp).await?;
        Ok(())
    }

    async fn get(&self, doc_id: &str) -> Result<Option<EmbeddingDocument>> {
        let resp = self
            .http
            .get(self.url(&format!("/docs/{doc_id}")))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let resp = Self::check_status(resp).await?;
        let doc = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok(Some(doc))
    }

    async fn search_top_k(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        self.check_dimension(query.len(), "query vector")?;
        let resp = self
            .http
            .post(self.url("/search"))
            .json(&serde_json::json!({
                "vector": query,
                "k": k,
                "min_similarity": min_similarity,
            }))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let resp = Self::check_status(resp).await?;
        let parsed: SearchResponse = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok(parsed
            .hits
            .into_iter()
            .map(|h| SearchHit {
                doc: h.doc,
                similarity: h.similarity,
            })
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        let resp = self
            .http
            .get(self.url("/count"))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let resp = Self::check_status(resp).await?;
        let parsed: CountResponse = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok(parsed.count)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
