//! Graduated fallback levels.
//!
//! When the primary classification is weak the classifier walks up to
//! five strategies in strict ascending order and accepts the first one
//! whose confidence reaches the degradation floor. Levels 2–4 are pure
//! functions here; level 1 (reduced-similarity reclassification) lives
//! with the retrieval classifier, and level 5 is the generic help
//! backstop.

use mando_catalog::IntentCatalog;
use mando_domain::config::FallbackConfig;
use mando_sessions::Context;

/// A level's candidate answer before floor acceptance.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelCandidate {
    pub intent_id: String,
    pub confidence: f64,
    pub reason: String,
}

impl LevelCandidate {
    fn new(intent_id: &str, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            intent_id: intent_id.to_owned(),
            confidence,
            reason: reason.into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Level 2: general-domain heuristics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const GREETINGS: [&str; 5] = ["hola", "buenos días", "buenas tardes", "buenas noches", "buenas"];
const THANKS: [&str; 3] = ["gracias", "muchas gracias", "te lo agradezco"];
const GOODBYES: [&str; 4] = ["adiós", "hasta luego", "hasta mañana", "nos vemos"];
const HELP_ASKS: [&str; 4] = ["ayuda", "ayúdame", "qué puedes hacer", "no sé qué hacer"];

/// Cheap lexical rules mapping greetings/thanks/goodbye/help utterances
/// to their intents. Only returns intents present in the catalogue.
pub fn heuristics_level(utterance: &str, catalog: &IntentCatalog) -> Option<LevelCandidate> {
    let lowered = utterance.to_lowercase();
    let contains_any = |needles: &[&str]| needles.iter().any(|n| lowered.contains(n));

    let candidate = if contains_any(&GREETINGS) {
        LevelCandidate::new("saludo", 0.75, "lexical greeting match")
    } else if contains_any(&THANKS) {
        LevelCandidate::new("agradecimiento", 0.7, "lexical thanks match")
    } else if contains_any(&GOODBYES) {
        LevelCandidate::new("despedida", 0.7, "lexical goodbye match")
    } else if contains_any(&HELP_ASKS) {
        LevelCandidate::new("ayuda", 0.65, "lexical help match")
    } else {
        return None;
    };

    catalog.get(&candidate.intent_id).is_some().then_some(candidate)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Level 3: keyword mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configurable keyword → intent table, scored by earliest position and
/// occurrence frequency.
pub fn keyword_level(
    utterance: &str,
    cfg: &FallbackConfig,
    catalog: &IntentCatalog,
) -> Option<LevelCandidate> {
    let lowered = utterance.to_lowercase();
    if lowered.is_empty() {
        return None;
    }

    let mut best: Option<(String, f64, String)> = None;
    for (keyword, intent_id) in &cfg.keyword_intents {
        if catalog.get(intent_id).is_none() {
            continue;
        }
        let Some(position) = lowered.find(keyword.as_str()) else {
            continue;
        };
        let frequency = lowered.matches(keyword.as_str()).count();
        // Earlier position and more occurrences score higher.
        let score = frequency as f64 + (1.0 - position as f64 / lowered.len() as f64);

        let better = match &best {
            Some((_, best_score, _)) => score > *best_score,
            None => true,
        };
        if better {
            best = Some((
                intent_id.clone(),
                score,
                format!("keyword \"{keyword}\" at position {position}, {frequency}×"),
            ));
        }
    }

    best.map(|(intent_id, score, reason)| {
        let confidence = (0.4 + 0.2 * (score / (score + 2.0))).min(0.6);
        LevelCandidate {
            intent_id,
            confidence,
            reason,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Level 4: context analysis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pick a plausible default intent from session metadata: device type
/// first, then location, then time of day.
pub fn context_level(
    context: &Context,
    catalog: &IntentCatalog,
    hour_of_day: u32,
) -> Option<LevelCandidate> {
    let in_catalog = |candidate: LevelCandidate| {
        catalog.get(&candidate.intent_id).is_some().then_some(candidate)
    };

    if let Some(device) = context.metadata.get("device_type") {
        let candidate = match device.as_str() {
            "speaker" | "altavoz" => {
                Some(LevelCandidate::new("reproducir_musica", 0.35, "device is a speaker"))
            }
            "light" | "bombilla" => {
                Some(LevelCandidate::new("encender_luz", 0.35, "device is a light"))
            }
            _ => None,
        };
        if let Some(candidate) = candidate.and_then(in_catalog) {
            return Some(candidate);
        }
    }

    if context.metadata.contains_key("location") {
        if let Some(candidate) = in_catalog(LevelCandidate::new(
            "consultar_tiempo",
            0.32,
            "location metadata present",
        )) {
            return Some(candidate);
        }
    }

    let by_hour = match hour_of_day {
        6..=11 => Some(LevelCandidate::new(
            "consultar_tiempo",
            0.31,
            "morning hours default",
        )),
        20..=23 => Some(LevelCandidate::new(
            "encender_luz",
            0.31,
            "evening hours default",
        )),
        _ => None,
    };
    by_hour.and_then(in_catalog)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
