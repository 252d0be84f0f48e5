//! Retrieval-augmented classifier.
//!
//! Embed → top-k retrieval → LLM classification → weighted confidence.
//! A result below the chosen intent's acceptance threshold degrades
//! through the graduated fallback chain.

use std::sync::Arc;
use std::time::Instant;

use chrono::Timelike;

use mando_catalog::IntentCatalog;
use mando_domain::config::RagConfig;
use mando_domain::entity::{EntityType, ExtractedEntity, ExtractionSource};
use mando_domain::error::{Error, Result};
use mando_domain::intent::{ClassificationResult, FallbackLevel, HELP_INTENT};
use mando_domain::trace::TraceEvent;
use mando_index::{SearchHit, VectorStore};
use mando_providers::json::extract_json;
use mando_providers::traits::{CompletionRequest, EmbeddingProvider, LlmProvider};
use mando_sessions::Context;

use crate::confidence::{compute_signals, final_confidence};
use crate::fallback::{context_level, heuristics_level, keyword_level, LevelCandidate};
use crate::prompt::classification_prompt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classifier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RetrievalClassifier {
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorStore>,
    cfg: RagConfig,
}

impl RetrievalClassifier {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        cfg: RagConfig,
    ) -> Self {
        Self {
            llm,
            embedder,
            vectors,
            cfg,
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.cfg
    }

    /// Classify an utterance; degrade through the fallback chain when
    /// the primary result is weak or the primary path fails outright.
    ///
    /// With gradual degradation disabled, weak results return as-is and
    /// hard failures surface as errors.
    pub async fn classify(
        &self,
        utterance: &str,
        context: &Context,
        catalog: &IntentCatalog,
    ) -> Result<ClassificationResult> {
        let start = Instant::now();
        let degradable = self.cfg.fallback.enable_gradual_degradation;

        let primary = self.classify_primary(utterance, context, catalog, start).await;

        let result = match primary {
            Ok(result) => {
                let threshold = catalog
                    .get(&result.intent_id)
                    .and_then(|i| i.confidence_threshold)
                    .unwrap_or(self.cfg.confidence.accept_threshold);
                if result.confidence >= threshold || !degradable {
                    result
                } else {
                    self.degrade(utterance, context, catalog, Some(result), start)
                        .await
                }
            }
            Err(e) if degradable => {
                tracing::warn!(error = %e, "primary classification failed, degrading");
                self.degrade(utterance, context, catalog, None, start).await
            }
            Err(e) => return Err(e),
        };

        TraceEvent::ClassificationCompleted {
            intent: result.intent_id.clone(),
            confidence: result.confidence,
            examples_used: result.examples_used.len(),
            fallback_level: result.fallback_level.as_u8(),
            duration_ms: result.latency_ms,
        }
        .emit();

        Ok(result)
    }

    // ── primary path ────────────────────────────────────────────────

    async fn classify_primary(
        &self,
        utterance: &str,
        context: &Context,
        catalog: &IntentCatalog,
        start: Instant,
    ) -> Result<ClassificationResult> {
        let embedding = self.embedder.embed(utterance).await?;
        let hits = self
            .vectors
            .search_top_k(
                &embedding,
                self.cfg.retrieval.max_examples,
                Some(self.cfg.retrieval.min_similarity as f32),
            )
            .await?;

        self.classify_with_hits(utterance, context, catalog, &embedding, &hits, false, start)
            .await
    }

    /// Shared LLM classification step, also used by fallback level 1
    /// with a re-retrieved hit set (`fallback_used` drives the quality
    /// penalty).
    async fn classify_with_hits(
        &self,
        utterance: &str,
        context: &Context,
        catalog: &IntentCatalog,
        embedding: &[f32],
        hits: &[SearchHit],
        fallback_used: bool,
        start: Instant,
    ) -> Result<ClassificationResult> {
        let intent_ids = catalog.intent_ids();
        let summary = (!context.conversation_summary.is_empty())
            .then_some(context.conversation_summary.as_str());
        let prompt = classification_prompt(utterance, hits, &intent_ids, summary);

        let response = self.llm.complete(CompletionRequest::new(prompt)).await?;
        let value = extract_json(self.llm.provider_id(), &response)?;

        let intent_id = value
            .get("intent")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Provider {
                provider: self.llm.provider_id().to_owned(),
                message: "classification response missing 'intent'".into(),
            })?
            .to_owned();

        if catalog.get(&intent_id).is_none() {
            return Err(Error::Provider {
                provider: self.llm.provider_id().to_owned(),
                message: format!("classifier chose unknown intent \"{intent_id}\""),
            });
        }

        let llm_confidence = value
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        let entities = parse_entities(&value, llm_confidence);
        let reasoning = value
            .get("reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned();

        let latency_ms = start.elapsed().as_millis() as u64;
        let has_session_context =
            !context.entity_cache.is_empty() || !context.conversation_summary.is_empty();
        let signals = compute_signals(
            llm_confidence,
            hits,
            &intent_id,
            self.cfg.retrieval.max_examples,
            latency_ms,
            embedding,
            has_session_context,
            utterance,
        );
        let confidence = final_confidence(
            &signals,
            hits.len(),
            latency_ms,
            fallback_used,
            &self.cfg.confidence,
        );

        Ok(ClassificationResult {
            intent_id,
            confidence,
            examples_used: hits.iter().map(|h| h.doc.doc_id.clone()).collect(),
            entities,
            fallback_level: FallbackLevel::None,
            reasoning,
            latency_ms,
        })
    }

    // ── graduated fallback ──────────────────────────────────────────

    /// Try the fallback levels in strict ascending order, accepting the
    /// first whose confidence reaches the degradation floor. Level 5
    /// always answers.
    async fn degrade(
        &self,
        utterance: &str,
        context: &Context,
        catalog: &IntentCatalog,
        primary: Option<ClassificationResult>,
        start: Instant,
    ) -> ClassificationResult {
        let fb = &self.cfg.fallback;
        let floor = fb.min_confidence_for_degradation;

        // Level 1: reduced-similarity re-retrieval + reclassification.
        if fb.level_enabled[0] {
            if let Some(result) = self
                .reduced_similarity_level(utterance, context, catalog, start)
                .await
            {
                if result.confidence >= floor {
                    return accept(result, FallbackLevel::ReducedSimilarity, "reduced similarity floor");
                }
            }
        }

        // Level 2: general-domain lexical heuristics.
        if fb.level_enabled[1] {
            if let Some(candidate) = heuristics_level(utterance, catalog) {
                if candidate.confidence >= floor {
                    return from_candidate(candidate, FallbackLevel::GeneralHeuristics, start);
                }
            }
        }

        // Level 3: keyword → intent table.
        if fb.level_enabled[2] {
            if let Some(candidate) = keyword_level(utterance, fb, catalog) {
                if candidate.confidence >= floor {
                    return from_candidate(candidate, FallbackLevel::KeywordMapping, start);
                }
            }
        }

        // Level 4: session-context analysis. The hour comes from session
        // metadata when the device reports it, else the local clock.
        if fb.level_enabled[3] {
            let hour = context
                .metadata
                .get("hour_of_day")
                .and_then(|h| h.parse().ok())
                .unwrap_or_else(|| chrono::Local::now().hour());
            if let Some(candidate) = context_level(context, catalog, hour) {
                if candidate.confidence >= floor {
                    return from_candidate(candidate, FallbackLevel::ContextAnalysis, start);
                }
            }
        }

        // Level 5: the generic help backstop always answers.
        let reason = match primary {
            Some(p) => format!(
                "no fallback level matched; primary was {} at {:.2}",
                p.intent_id, p.confidence
            ),
            None => "no fallback level matched; primary classification failed".into(),
        };
        let mut result = ClassificationResult::help(FallbackLevel::Generic, fb.generic_confidence, reason);
        result.latency_ms = start.elapsed().as_millis() as u64;
        TraceEvent::FallbackLevelAccepted {
            level: 5,
            intent: HELP_INTENT.into(),
            confidence: result.confidence,
            reason: result.reasoning.clone(),
        }
        .emit();
        result
    }

    async fn reduced_similarity_level(
        &self,
        utterance: &str,
        context: &Context,
        catalog: &IntentCatalog,
        start: Instant,
    ) -> Option<ClassificationResult> {
        let reduced_floor =
            (self.cfg.retrieval.min_similarity * self.cfg.fallback.similarity_reduction_factor) as f32;

        let embedding = self.embedder.embed(utterance).await.ok()?;
        let hits = self
            .vectors
            .search_top_k(&embedding, self.cfg.retrieval.max_examples, Some(reduced_floor))
            .await
            .ok()?;

        self.classify_with_hits(utterance, context, catalog, &embedding, &hits, true, start)
            .await
            .ok()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_entities(value: &serde_json::Value, confidence: f64) -> Vec<ExtractedEntity> {
    let Some(map) = value.get("entities").and_then(|v| v.as_object()) else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(key, raw)| {
            let entity_type = EntityType::for_slot(key)?;
            let text = match raw {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some(ExtractedEntity::new(
                entity_type,
                text,
                confidence,
                ExtractionSource::Llm,
            ))
        })
        .collect()
}

fn accept(
    mut result: ClassificationResult,
    level: FallbackLevel,
    reason: &str,
) -> ClassificationResult {
    result.fallback_level = level;
    TraceEvent::FallbackLevelAccepted {
        level: level.as_u8(),
        intent: result.intent_id.clone(),
        confidence: result.confidence,
        reason: reason.to_owned(),
    }
    .emit();
    result
}

fn from_candidate(
    candidate: LevelCandidate,
    level: FallbackLevel,
    start: Instant,
) -> ClassificationResult {
    TraceEvent::FallbackLevelAccepted {
        level: level.as_u8(),
        intent: candidate.intent_id.clone(),
        confidence: candidate.confidence,
        reason: candidate.reason.clone(),
    }
    .emit();
    ClassificationResult {
        intent_id: candidate.intent_id,
        confidence: candidate.confidence,
        examples_used: Vec::new(),
        entities: Vec::new(),
        fallback_level: level,
        reasoning: candidate.reason,
        latency_ms: start.elapsed().as_millis() as u64,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
