//! HTTP adapter for the embedding endpoint.
//!
//! Wire contract: POST `{model, text}` → `{vector: [float…]}` of the
//! configured fixed dimension. A response of any other dimension is a
//! provider error — never silently padded or truncated.

use std::time::{Duration, Instant};

use mando_domain::config::EmbeddingConfig;
use mando_domain::error::{Error, Result};
use mando_domain::trace::TraceEvent;

use crate::retry::with_backoff;
use crate::traits::EmbeddingProvider;

pub struct HttpEmbeddingProvider {
    http: reqwest::Client,
    cfg: EmbeddingConfig,
}

impl HttpEmbeddingProvider {
    pub fn new(cfg: EmbeddingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embed", self.cfg.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.cfg.model,
            "text": text,
        });

        let start = Instant::now();
        let resp = self.http.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout("embedding request".into())
            } else {
                Error::Http(format!("embedding request failed: {e}"))
            }
        })?;

        let status = resp.status();
        TraceEvent::ProviderCall {
            provider: "embeddings".into(),
            endpoint: "/api/embed".into(),
            status: status.as_u16(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: "embeddings".into(),
                message: format!("HTTP {}: {body_text}", status.as_u16()),
            });
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("failed to parse embedding response: {e}")))?;

        let vector: Vec<f32> = json
            .get("vector")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::Provider {
                provider: "embeddings".into(),
                message: "response missing 'vector' array".into(),
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        if vector.len() != self.cfg.dimension {
            return Err(Error::Provider {
                provider: "embeddings".into(),
                message: format!(
                    "vector dimension {} does not match configured {}",
                    vector.len(),
                    self.cfg.dimension
                ),
            });
        }

        Ok(vector)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        with_backoff(self.cfg.max_retries, || self.embed_once(text)).await
    }

    fn dimension(&self) -> usize {
        self.cfg.dimension
    }
}
