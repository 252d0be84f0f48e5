//! Entity recognizer: three strategies, one merge.
//!
//! Pattern, LLM, and context extraction run concurrently; the merge
//! keeps the highest-confidence extraction per (type, normalized value)
//! and discards anything below the configured floor.

use std::collections::HashMap;
use std::sync::Arc;

use mando_domain::config::EntityConfig;
use mando_domain::entity::{EntityType, ExtractedEntity, ExtractionSource};
use mando_providers::json::extract_json;
use mando_providers::traits::{CompletionRequest, LlmProvider};
use mando_sessions::{Context, Turn};

use crate::normalize::normalize_value;
use crate::patterns::pattern_extract;

/// Confidence decay applied to entity-cache lookups: remembered values
/// are weaker evidence than the current utterance.
const CONTEXT_DECAY: f64 = 0.8;

pub struct EntityRecognizer {
    llm: Option<Arc<dyn LlmProvider>>,
    cfg: EntityConfig,
}

impl EntityRecognizer {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>, cfg: EntityConfig) -> Self {
        Self { llm, cfg }
    }

    /// Extract entities of the requested types from an utterance.
    ///
    /// `requested` limits the LLM and context strategies; the pattern
    /// catalogue always runs in full (cheap, and extra finds enrich the
    /// entity cache).
    pub async fn extract(
        &self,
        utterance: &str,
        context: &Context,
        recent_turns: &[Turn],
        requested: &[EntityType],
    ) -> Vec<ExtractedEntity> {
        let (pattern, llm, ctx) = tokio::join!(
            async { pattern_extract(utterance) },
            self.llm_extract(utterance, requested),
            async { context_extract(context, recent_turns, requested) },
        );

        let mut all = pattern;
        all.extend(llm);
        all.extend(ctx);
        self.merge(all)
    }

    /// Keep the best extraction per (type, normalized value); drop
    /// entries under the confidence floor.
    fn merge(&self, entities: Vec<ExtractedEntity>) -> Vec<ExtractedEntity> {
        let mut best: HashMap<(EntityType, String), ExtractedEntity> = HashMap::new();
        for mut entity in entities {
            entity.normalized = normalize_value(entity.entity_type, &entity.value);
            if entity.confidence < self.cfg.confidence_floor {
                continue;
            }
            let key = (entity.entity_type, entity.normalized.clone());
            match best.get(&key) {
                Some(existing) if existing.confidence >= entity.confidence => {}
                _ => {
                    best.insert(key, entity);
                }
            }
        }
        let mut merged: Vec<ExtractedEntity> = best.into_values().collect();
        merged.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entity_type.as_str().cmp(b.entity_type.as_str()))
        });
        merged
    }

    /// Structured LLM extraction over the requested types.
    async fn llm_extract(
        &self,
        utterance: &str,
        requested: &[EntityType],
    ) -> Vec<ExtractedEntity> {
        if !self.cfg.enable_llm_extraction || requested.is_empty() {
            return Vec::new();
        }
        let Some(ref llm) = self.llm else {
            return Vec::new();
        };

        let types = requested
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let prompt = format!(
            "Extrae entidades de la frase.\n\
             Tipos buscados: {types}\n\
             Frase: \"{utterance}\"\n\n\
             Responde SOLO JSON con los tipos encontrados:\n\
             {{\"<tipo>\": {{\"value\": \"<valor>\", \"confidence\": <0.0-1.0>}}}}"
        );

        let response = match llm.complete(CompletionRequest::new(prompt)).await {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(error = %e, "LLM entity extraction unavailable");
                return Vec::new();
            }
        };
        let Ok(value) = extract_json(llm.provider_id(), &response) else {
            tracing::debug!("LLM entity extraction returned non-JSON");
            return Vec::new();
        };
        let Some(map) = value.as_object() else {
            return Vec::new();
        };

        map.iter()
            .filter_map(|(key, item)| {
                let entity_type = EntityType::for_slot(key)?;
                if !requested.contains(&entity_type) {
                    return None;
                }
                let (text, confidence) = match item {
                    serde_json::Value::String(s) => (s.clone(), 0.7),
                    serde_json::Value::Object(fields) => (
                        fields.get("value")?.as_str()?.to_owned(),
                        fields
                            .get("confidence")
                            .and_then(|c| c.as_f64())
                            .unwrap_or(0.7)
                            .clamp(0.0, 1.0),
                    ),
                    _ => return None,
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
}

/// Look up requested types in the session entity cache and recent turn
/// snapshots: entities the user likely referenced but did not repeat.
fn context_extract(
    context: &Context,
    recent_turns: &[Turn],
    requested: &[EntityType],
) -> Vec<ExtractedEntity> {
    let mut out = Vec::new();

    for &entity_type in requested {
        if let Some(cached) = context.entity_cache.get(entity_type.as_str()) {
            out.push(ExtractedEntity::new(
                entity_type,
                cached.value.clone(),
                (cached.confidence * CONTEXT_DECAY).clamp(0.0, 1.0),
                ExtractionSource::Context,
            ));
            continue;
        }

        // Fall back to the most recent turn whose slot snapshot carried
        // a value of this type.
        for turn in recent_turns.iter().rev() {
            let hit = turn.slots_snapshot.iter().find_map(|(slot, value)| {
                (EntityType::for_slot(slot) == Some(entity_type)).then_some(value)
            });
            if let Some(value) = hit {
                out.push(ExtractedEntity::new(
                    entity_type,
                    value.clone(),
                    0.5,
                    ExtractionSource::Context,
                ));
                break;
            }
        }
    }

    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mando_providers::testing::MockLlm;
    use std::collections::BTreeMap;

    fn recognizer(llm: Option<Arc<MockLlm>>) -> EntityRecognizer {
        EntityRecognizer::new(
            llm.map(|l| l as Arc<dyn LlmProvider>),
            EntityConfig::default(),
        )
    }

    fn find(entities: &[ExtractedEntity], t: EntityType) -> Option<&ExtractedEntity> {
        entities.iter().find(|e| e.entity_type == t)
    }

    #[tokio::test]
    async fn pattern_only_extraction() {
        let recognizer = recognizer(None);
        let out = recognizer
            .extract(
                "enciende la luz del salón",
                &Context::default(),
                &[],
                &[EntityType::Location],
            )
            .await;
        let location = find(&out, EntityType::Location).unwrap();
        assert_eq!(location.normalized, "salón");
        assert_eq!(location.source, ExtractionSource::Pattern);
    }

    #[tokio::test]
    async fn llm_adds_entities_patterns_miss() {
        let llm = Arc::new(MockLlm::new(
            "primary",
            r#"{"song": {"value": "Imagine", "confidence": 0.85}}"#,
        ));
        let recognizer = recognizer(Some(llm));
        let out = recognizer
            .extract(
                "pon esa de John Lennon",
                &Context::default(),
                &[],
                &[EntityType::Song],
            )
            .await;
        let song = find(&out, EntityType::Song).unwrap();
        assert_eq!(song.value, "Imagine");
        assert_eq!(song.source, ExtractionSource::Llm);
    }

    #[tokio::test]
    async fn merge_keeps_highest_confidence_per_value() {
        // The LLM repeats the same location the pattern found, with
        // lower confidence; only one survives, the stronger.
        let llm = Arc::new(MockLlm::new(
            "primary",
            r#"{"location": {"value": "salón", "confidence": 0.5}}"#,
        ));
        let recognizer = recognizer(Some(llm));
        let out = recognizer
            .extract(
                "enciende la luz del salón",
                &Context::default(),
                &[],
                &[EntityType::Location],
            )
            .await;

        let locations: Vec<_> = out
            .iter()
            .filter(|e| e.entity_type == EntityType::Location && e.normalized == "salón")
            .collect();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].source, ExtractionSource::Pattern);
        assert!(locations[0].confidence > 0.5);
    }

    #[tokio::test]
    async fn context_supplies_unrepeated_entities() {
        let mut ctx = Context::default();
        ctx.cache_entity("location", "Madrid", 0.9, Utc::now());

        let recognizer = recognizer(None);
        let out = recognizer
            .extract("¿y mañana?", &ctx, &[], &[EntityType::Location, EntityType::Date])
            .await;

        let location = find(&out, EntityType::Location).unwrap();
        assert_eq!(location.value, "Madrid");
        assert_eq!(location.source, ExtractionSource::Context);
        assert!((location.confidence - 0.72).abs() < 1e-9);

        // "mañana" still comes from the pattern pass.
        assert_eq!(find(&out, EntityType::Date).unwrap().value, "mañana");
    }

    #[tokio::test]
    async fn recent_turn_snapshot_used_when_cache_empty() {
        let mut snapshot = BTreeMap::new();
        snapshot.insert("hora".to_owned(), "07:30".to_owned());
        let turn = Turn {
            turn_id: 1,
            user_text: "a las siete y media".into(),
            assistant_text: "hecho".into(),
            intent_id: None,
            confidence: None,
            slots_snapshot: snapshot,
            created_at: Utc::now(),
        };

        let recognizer = recognizer(None);
        let out = recognizer
            .extract("cámbiala", &Context::default(), &[turn], &[EntityType::Time])
            .await;
        let time = find(&out, EntityType::Time).unwrap();
        assert_eq!(time.value, "07:30");
        assert_eq!(time.source, ExtractionSource::Context);
    }

    #[tokio::test]
    async fn floor_discards_weak_extractions() {
        let mut cfg = EntityConfig::default();
        cfg.confidence_floor = 0.95;
        let recognizer = EntityRecognizer::new(None, cfg);

        let out = recognizer
            .extract(
                "enciende la luz del salón",
                &Context::default(),
                &[],
                &[EntityType::Location],
            )
            .await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn llm_failure_degrades_to_patterns() {
        let llm = Arc::new(MockLlm::new("primary", ""));
        llm.push_failure("HTTP 500: down");
        let recognizer = recognizer(Some(llm));

        let out = recognizer
            .extract(
                "consulta el tiempo en Madrid",
                &Context::default(),
                &[],
                &[EntityType::Location],
            )
            .await;
        assert_eq!(find(&out, EntityType::Location).unwrap().value, "Madrid");
    }
}
