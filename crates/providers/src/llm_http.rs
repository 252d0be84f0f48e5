//! HTTP adapter for the LLM completion endpoint.
//!
//! Wire contract: POST `{model, prompt, temperature, max_tokens}`;
//! the response body carries the completion text, either as a JSON
//! object with a `text` field or as the raw body.

use std::time::{Duration, Instant};

use mando_domain::config::LlmProviderConfig;
use mando_domain::error::{Error, Result};
use mando_domain::trace::TraceEvent;

use crate::retry::with_backoff;
use crate::traits::{CompletionRequest, LlmProvider};

pub struct HttpLlmProvider {
    http: reqwest::Client,
    cfg: LlmProviderConfig,
    api_key: Option<String>,
}

impl HttpLlmProvider {
    pub fn new(cfg: LlmProviderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))?;

        let api_key = cfg
            .api_key_env
            .as_deref()
            .and_then(|env| std::env::var(env).ok())
            .filter(|key| !key.is_empty());

        Ok(Self { http, cfg, api_key })
    }

    async fn complete_once(&self, req: &CompletionRequest) -> Result<String> {
        let url = format!("{}/v1/complete", self.cfg.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.cfg.model,
            "prompt": req.prompt,
            "temperature": req.temperature.unwrap_or(self.cfg.temperature),
            "max_tokens": req.max_tokens.unwrap_or(self.cfg.max_tokens),
        });

        let start = Instant::now();
        let mut rb = self.http.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            rb = rb.bearer_auth(key);
        }

        let resp = rb.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("LLM {} completion", self.cfg.id))
            } else if e.is_connect() {
                Error::Http(format!("connection failed: {e}"))
            } else {
                Error::Http(e.to_string())
            }
        })?;

        let status = resp.status();
        TraceEvent::ProviderCall {
            provider: self.cfg.id.clone(),
            endpoint: "/v1/complete".into(),
            status: status.as_u16(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(Error::Auth(format!(
                    "LLM {} returned {status}",
                    self.cfg.id
                )));
            }
            return Err(Error::Provider {
                provider: self.cfg.id.clone(),
                message: format!("HTTP {}: {text}", status.as_u16()),
            });
        }

        // The endpoint may wrap the completion as {"text": "..."}.
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
            if let Some(inner) = value.get("text").and_then(|t| t.as_str()) {
                return Ok(inner.to_owned());
            }
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn complete(&self, req: CompletionRequest) -> Result<String> {
        with_backoff(self.cfg.max_retries, || self.complete_once(&req)).await
    }

    fn provider_id(&self) -> &str {
        &self.cfg.id
    }
}
