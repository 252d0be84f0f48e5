//! Pattern-based entity extraction.
//!
//! A fixed catalogue of regexes per entity type, compiled once. Each
//! match carries a type-specific base confidence adjusted by
//! capitalization, format specificity, and length.

use std::sync::OnceLock;

use regex::Regex;

use mando_domain::entity::{EntityType, ExtractedEntity, ExtractionSource};

struct PatternDef {
    entity_type: EntityType,
    regex: Regex,
    /// Index of the capture group holding the value.
    group: usize,
    base_confidence: f64,
}

const ROOM_WORDS: &str =
    "salón|salon|cocina|dormitorio|baño|bano|garaje|terraza|oficina|habitación|habitacion|pasillo";

const GENRE_WORDS: &str =
    "rock|pop|jazz|blues|rap|salsa|flamenco|reggaeton|clásica|clasica|electrónica|electronica";

fn catalogue() -> &'static Vec<PatternDef> {
    static PATTERNS: OnceLock<Vec<PatternDef>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let def = |entity_type, pattern: &str, group, base_confidence| PatternDef {
            entity_type,
            regex: Regex::new(pattern).expect("pattern catalogue regex"),
            group,
            base_confidence,
        };

        vec![
            // Rooms referenced as places: "la luz del salón".
            def(
                EntityType::Location,
                &format!(r"(?i)\b(?:en|del|de la|en el|en la)\s+(?:el\s+|la\s+)?({ROOM_WORDS})\b"),
                1,
                0.8,
            ),
            // Capitalized place names: "en Madrid", "para Buenos Aires".
            def(
                EntityType::Location,
                r"\b(?:en|En|para|desde|hasta)\s+([A-ZÁÉÍÓÚÑ][a-záéíóúñ]+(?:\s+[A-ZÁÉÍÓÚÑ][a-záéíóúñ]+)?)\b",
                1,
                0.65,
            ),
            def(
                EntityType::Room,
                &format!(r"(?i)\b({ROOM_WORDS})\b"),
                1,
                0.8,
            ),
            // ISO dates.
            def(EntityType::Date, r"\b(\d{4}-\d{2}-\d{2})\b", 1, 0.95),
            // Relative dates.
            def(
                EntityType::Date,
                r"(?i)\b(hoy|mañana|pasado mañana|ayer)\b",
                1,
                0.85,
            ),
            // "el 14 de julio"
            def(
                EntityType::Date,
                r"(?i)\b(\d{1,2}\s+de\s+(?:enero|febrero|marzo|abril|mayo|junio|julio|agosto|septiembre|octubre|noviembre|diciembre))\b",
                1,
                0.8,
            ),
            // HH:MM clock times.
            def(EntityType::Time, r"\b([01]?\d:[0-5]\d|2[0-3]:[0-5]\d)\b", 1, 0.95),
            // "a las 7", "a la 1"
            def(EntityType::Time, r"(?i)\ba\s+las?\s+(\d{1,2})\b", 1, 0.8),
            // "a las siete y media"
            def(
                EntityType::Time,
                r"(?i)\ba\s+las?\s+((?:una|dos|tres|cuatro|cinco|seis|siete|ocho|nueve|diez|once|doce)(?:\s+y\s+(?:media|cuarto))?)",
                1,
                0.75,
            ),
            // "23 grados", "-5°C"
            def(
                EntityType::Temperature,
                r"(?i)(-?\d{1,2})\s*(?:grados|°\s*c?|º\s*c?)",
                1,
                0.85,
            ),
            // "llama a María", "avisa a Juan"
            def(
                EntityType::Person,
                r"(?i)\b(?:llama|avisa|dile|escribe)\s+a\s+([A-ZÁÉÍÓÚÑ][a-záéíóúñ]+)\b",
                1,
                0.75,
            ),
            // "música de Sabina", "canciones de Miles Davis"
            def(
                EntityType::Artist,
                r"(?i)\b(?:música|canciones|temas|algo)\s+de\s+([A-ZÁÉÍÓÚÑ][\wáéíóúñ]+(?:\s+[A-ZÁÉÍÓÚÑ][\wáéíóúñ]+)?)",
                1,
                0.7,
            ),
            def(
                EntityType::Genre,
                &format!(r"(?i)\b({GENRE_WORDS})\b"),
                1,
                0.85,
            ),
            // Quoted song titles: pon "lucía"
            def(EntityType::Song, r#""([^"]{2,80})""#, 1, 0.75),
            // "la canción Imagine"
            def(
                EntityType::Song,
                r"(?i)\bcanción\s+([\wáéíóúñ][\wáéíóúñ\s]{1,40}?)(?:\s+de\b|[,.!?]|$)",
                1,
                0.6,
            ),
        ]
    })
}

/// Run the pattern catalogue over an utterance.
pub fn pattern_extract(utterance: &str) -> Vec<ExtractedEntity> {
    let mut out = Vec::new();
    for def in catalogue() {
        for captures in def.regex.captures_iter(utterance) {
            let Some(value) = captures.get(def.group) else {
                continue;
            };
            let value = value.as_str().trim();
            if value.is_empty() {
                continue;
            }
            let confidence = adjust_confidence(def.base_confidence, def.entity_type, value);
            out.push(ExtractedEntity::new(
                def.entity_type,
                value,
                confidence,
                ExtractionSource::Pattern,
            ));
        }
    }
    out
}

/// Adjust a base confidence by capitalization, format specificity, and
/// length.
fn adjust_confidence(base: f64, entity_type: EntityType, value: &str) -> f64 {
    let mut confidence = base;

    let starts_upper = value.chars().next().is_some_and(char::is_uppercase);
    if starts_upper
        && matches!(
            entity_type,
            EntityType::Location | EntityType::Person | EntityType::Artist
        )
    {
        confidence += 0.1;
    }

    // Fully specific formats read stronger.
    match entity_type {
        EntityType::Time if value.contains(':') => confidence += 0.05,
        EntityType::Date if value.len() == 10 && value.contains('-') => confidence += 0.05,
        _ => {}
    }

    match value.chars().count() {
        0..=2 => confidence -= 0.1,
        3..=30 => confidence += 0.05,
        _ => confidence -= 0.05,
    }

    confidence.clamp(0.0, 1.0)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
