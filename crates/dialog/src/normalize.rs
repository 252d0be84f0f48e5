//! Entity normalization and validation.
//!
//! Normalizes surface forms into canonical values (capitalized places,
//! HH:MM times, ISO or relative-keyword dates, unit-bearing
//! temperatures, whitelisted genres) and validates per-type rules.
//! Entities failing validation are dropped, not patched.

use std::sync::Arc;

use mando_domain::config::EntityConfig;
use mando_domain::entity::{EntityType, ExtractedEntity};
use mando_domain::error::{Error, Result};
use mando_providers::json::extract_json;
use mando_providers::traits::{CompletionRequest, LlmProvider};

const ROOM_WORDS: [&str; 12] = [
    "salón", "salon", "cocina", "dormitorio", "baño", "bano", "garaje", "terraza", "oficina",
    "habitación", "habitacion", "pasillo",
];

const RELATIVE_DATES: [&str; 4] = ["hoy", "mañana", "pasado mañana", "ayer"];

const GENRES: [&str; 12] = [
    "rock", "pop", "jazz", "blues", "rap", "salsa", "flamenco", "reggaeton", "clásica", "clasica",
    "electrónica", "electronica",
];

const WORD_HOURS: [(&str, u32); 12] = [
    ("una", 1),
    ("dos", 2),
    ("tres", 3),
    ("cuatro", 4),
    ("cinco", 5),
    ("seis", 6),
    ("siete", 7),
    ("ocho", 8),
    ("nueve", 9),
    ("diez", 10),
    ("once", 11),
    ("doce", 12),
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Normalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Canonicalize a raw value for its entity type. Returns the input
/// unchanged when no rule applies (validation decides acceptance).
pub fn normalize_value(entity_type: EntityType, raw: &str) -> String {
    let trimmed = raw.trim();
    match entity_type {
        EntityType::Location => normalize_location(trimmed),
        EntityType::Room => trimmed.to_lowercase(),
        EntityType::Time => normalize_time(trimmed).unwrap_or_else(|| trimmed.to_owned()),
        EntityType::Date => normalize_date(trimmed),
        EntityType::Temperature => normalize_temperature(trimmed).unwrap_or_else(|| trimmed.to_owned()),
        EntityType::Genre => trimmed.to_lowercase(),
        EntityType::Person | EntityType::Artist => capitalize_words(trimmed),
        EntityType::Song => trimmed.to_owned(),
    }
}

/// Room-like places stay lowercase ("salón"); proper places capitalize
/// ("madrid" → "Madrid").
fn normalize_location(value: &str) -> String {
    let lowered = value.to_lowercase();
    if ROOM_WORDS.contains(&lowered.as_str()) {
        lowered
    } else {
        capitalize_words(value)
    }
}

fn capitalize_words(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize to `HH:MM`: clock forms pad, bare hours get `:00`, word
/// forms ("siete y media") resolve via the hour table.
fn normalize_time(value: &str) -> Option<String> {
    let lowered = value.to_lowercase();

    if let Some((h, m)) = lowered.split_once(':') {
        let hour: u32 = h.trim().parse().ok()?;
        let minute: u32 = m.trim().parse().ok()?;
        return (hour <= 23 && minute <= 59).then(|| format!("{hour:02}:{minute:02}"));
    }

    if let Ok(hour) = lowered.parse::<u32>() {
        return (hour <= 23).then(|| format!("{hour:02}:00"));
    }

    // Word forms: "<hora>", "<hora> y media", "<hora> y cuarto".
    let (hour_word, minute) = match lowered.split_once(" y ") {
        Some((hour_word, "media")) => (hour_word.trim(), 30),
        Some((hour_word, "cuarto")) => (hour_word.trim(), 15),
        Some(_) => return None,
        None => (lowered.as_str(), 0),
    };
    let (_, hour) = WORD_HOURS.iter().find(|(word, _)| *word == hour_word)?;
    Some(format!("{hour:02}:{minute:02}"))
}

/// ISO dates pass through; relative keywords stay as keywords.
fn normalize_date(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Unit-bearing form: "23" / "23 grados" → "23°C".
fn normalize_temperature(value: &str) -> Option<String> {
    let digits: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    let degrees: i32 = digits.parse().ok()?;
    Some(format!("{degrees}°C"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a normalized value against its type rules.
pub fn validate_value(entity_type: EntityType, normalized: &str) -> Result<()> {
    let fail = |why: &str| {
        Err(Error::Validation(format!(
            "{} \"{normalized}\": {why}",
            entity_type.as_str()
        )))
    };

    if normalized.is_empty() {
        return fail("empty value");
    }
    if normalized.chars().count() > 100 {
        return fail("value too long");
    }

    match entity_type {
        EntityType::Time => {
            let Some((h, m)) = normalized.split_once(':') else {
                return fail("expected HH:MM");
            };
            let hour: u32 = match h.parse() {
                Ok(v) => v,
                Err(_) => return fail("expected HH:MM"),
            };
            let minute: u32 = match m.parse() {
                Ok(v) => v,
                Err(_) => return fail("expected HH:MM"),
            };
            if hour > 23 || minute > 59 {
                return fail("hour or minute out of range");
            }
        }
        EntityType::Date => {
            let is_relative = RELATIVE_DATES.contains(&normalized);
            let is_iso = chrono::NaiveDate::parse_from_str(normalized, "%Y-%m-%d").is_ok();
            let is_spelled = normalized.contains(" de ");
            if !is_relative && !is_iso && !is_spelled {
                return fail("expected YYYY-MM-DD or a relative keyword");
            }
        }
        EntityType::Temperature => {
            let degrees: i32 = match normalized.trim_end_matches("°C").parse() {
                Ok(v) => v,
                Err(_) => return fail("expected a number of degrees"),
            };
            if !(-50..=60).contains(&degrees) {
                return fail("temperature outside −50…60 °C");
            }
        }
        EntityType::Genre => {
            if !GENRES.contains(&normalized) {
                return fail("unknown genre");
            }
        }
        EntityType::Location | EntityType::Room | EntityType::Person | EntityType::Artist => {
            if normalized.chars().all(|c| c.is_ascii_digit()) {
                return fail("expected a name, got digits");
            }
        }
        EntityType::Song => {}
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalizes and validates merged extractions; optionally asks the LLM
/// for a semantic sanity check that can adjust confidence.
pub struct EntityValidator {
    llm: Option<Arc<dyn LlmProvider>>,
    cfg: EntityConfig,
}

impl EntityValidator {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>, cfg: EntityConfig) -> Self {
        Self { llm, cfg }
    }

    /// Normalize and validate a batch. Invalid entities are dropped with
    /// a log line; valid ones come back with `normalized` canonical.
    pub async fn validate_all(
        &self,
        utterance: &str,
        entities: Vec<ExtractedEntity>,
    ) -> Vec<ExtractedEntity> {
        let mut valid = Vec::with_capacity(entities.len());
        for mut entity in entities {
            entity.normalized = normalize_value(entity.entity_type, &entity.value);
            match validate_value(entity.entity_type, &entity.normalized) {
                Ok(()) => valid.push(entity),
                Err(e) => {
                    tracing::debug!(error = %e, "dropping invalid entity");
                }
            }
        }

        if self.cfg.enable_semantic_check && !valid.is_empty() {
            if let Some(ref llm) = self.llm {
                self.semantic_adjust(llm, utterance, &mut valid).await;
            }
        }

        valid
    }

    /// Ask the LLM whether each entity is plausible in the utterance;
    /// scale confidences by the returned factors. Failures leave the
    /// confidences untouched.
    async fn semantic_adjust(
        &self,
        llm: &Arc<dyn LlmProvider>,
        utterance: &str,
        entities: &mut [ExtractedEntity],
    ) {
        let listing = entities
            .iter()
            .map(|e| format!("- {}: \"{}\"", e.entity_type.as_str(), e.normalized))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Frase: \"{utterance}\"\n\nEntidades extraídas:\n{listing}\n\n\
             Para cada entidad responde un factor de plausibilidad 0.0-1.0.\n\
             Responde SOLO JSON: {{\"<tipo>\": <factor>}}"
        );

        let response = match llm.complete(CompletionRequest::new(prompt)).await {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(error = %e, "semantic check unavailable");
                return;
            }
        };
        let Ok(value) = extract_json(llm.provider_id(), &response) else {
            return;
        };
        let Some(map) = value.as_object() else {
            return;
        };

        for entity in entities.iter_mut() {
            if let Some(factor) = map.get(entity.entity_type.as_str()).and_then(|v| v.as_f64()) {
                entity.confidence = (entity.confidence * factor.clamp(0.0, 1.0)).clamp(0.0, 1.0);
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
