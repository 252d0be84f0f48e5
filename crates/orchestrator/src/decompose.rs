//! Subtask decomposition.
//!
//! Two strategies over the utterance — LLM decomposition and pattern
//! decomposition over multi-action fragments — unioned and deduplicated
//! by (action, canonicalized entities), bounded by `max_subtasks`.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use mando_catalog::ToolActionRegistry;
use mando_dialog::patterns::pattern_extract;
use mando_domain::config::OrchestratorConfig;
use mando_domain::entity::EntityType;
use mando_domain::subtask::Subtask;
use mando_providers::json::extract_json;
use mando_providers::traits::{CompletionRequest, LlmProvider};

/// Decomposition confidence assigned to pattern matches.
const PATTERN_CONFIDENCE: f64 = 0.8;

pub struct SubtaskDecomposer {
    llm: Option<Arc<dyn LlmProvider>>,
    cfg: OrchestratorConfig,
}

impl SubtaskDecomposer {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>, cfg: OrchestratorConfig) -> Self {
        Self { llm, cfg }
    }

    /// Produce candidate subtasks for an utterance.
    pub async fn decompose(
        &self,
        utterance: &str,
        actions: &ToolActionRegistry,
    ) -> Vec<Subtask> {
        let (from_llm, from_patterns) = tokio::join!(
            self.llm_decompose(utterance, actions),
            async { pattern_decompose(utterance, actions) },
        );

        // Union with dedup by canonical (action, entities); the higher
        // decomposition confidence wins.
        let mut best: HashMap<String, Subtask> = HashMap::new();
        for subtask in from_llm.into_iter().chain(from_patterns) {
            let key = subtask.canonical_key();
            match best.get(&key) {
                Some(existing) if existing.confidence >= subtask.confidence => {}
                _ => {
                    best.insert(key, subtask);
                }
            }
        }

        let mut subtasks: Vec<Subtask> = best.into_values().collect();
        subtasks.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.subtask_id.cmp(&b.subtask_id))
        });
        subtasks.truncate(self.cfg.max_subtasks);
        subtasks
    }

    // ── LLM strategy ────────────────────────────────────────────────

    async fn llm_decompose(
        &self,
        utterance: &str,
        actions: &ToolActionRegistry,
    ) -> Vec<Subtask> {
        let Some(ref llm) = self.llm else {
            return Vec::new();
        };

        let listing = actions
            .action_ids()
            .iter()
            .filter_map(|id| actions.get(id))
            .map(|action| {
                let params = action
                    .params
                    .iter()
                    .map(|p| p.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("- {} ({params})", action.action_id)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Descompón la petición en subtareas ejecutables.\n\
             Acciones disponibles:\n{listing}\n\n\
             Petición: \"{utterance}\"\n\n\
             Responde SOLO un array JSON de como máximo {} elementos:\n\
             [{{\"action\": \"<action_id>\", \"description\": \"<desc>\", \
             \"entities\": {{\"<param>\": \"<valor>\"}}, \"dependencies\": [<índices>]}}]",
            self.cfg.max_subtasks
        );

        let response = match llm.complete(CompletionRequest::new(prompt)).await {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(error = %e, "LLM decomposition unavailable");
                return Vec::new();
            }
        };
        let Ok(value) = extract_json(llm.provider_id(), &response) else {
            tracing::debug!("LLM decomposition returned non-JSON");
            return Vec::new();
        };
        let Some(items) = value.as_array() else {
            return Vec::new();
        };

        // First pass: build subtasks, keyed by their position in the
        // model's array (malformed entries are skipped, so dependency
        // indices must map through the original positions).
        let mut accepted: Vec<(usize, Subtask)> = Vec::new();
        let mut ids_by_position: HashMap<usize, String> = HashMap::new();
        for (position, item) in items.iter().take(self.cfg.max_subtasks).enumerate() {
            let Some(action) = item.get("action").and_then(|a| a.as_str()) else {
                continue;
            };
            let mut subtask = Subtask::new(format!("st-{}", position + 1), action);
            subtask.description = item
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or(action)
                .to_owned();
            subtask.confidence = item
                .get("confidence")
                .and_then(|c| c.as_f64())
                .unwrap_or(0.7)
                .clamp(0.0, 1.0);
            if let Some(entities) = item.get("entities").and_then(|e| e.as_object()) {
                for (k, v) in entities {
                    subtask.entities.insert(k.clone(), v.clone());
                }
            }
            ids_by_position.insert(position, subtask.subtask_id.clone());
            accepted.push((position, subtask));
        }

        // Second pass: resolve dependency indices to subtask ids.
        let mut subtasks = Vec::with_capacity(accepted.len());
        for (position, mut subtask) in accepted {
            if let Some(deps) = items[position].get("dependencies").and_then(|d| d.as_array()) {
                for dep in deps {
                    if let Some(target) = dep.as_u64() {
                        if let Some(id) = ids_by_position.get(&(target as usize)) {
                            if *id != subtask.subtask_id {
                                subtask.dependencies.insert(id.clone());
                            }
                        }
                    }
                }
            }
            subtasks.push(subtask);
        }

        subtasks
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pattern strategy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ActionPattern {
    action_id: &'static str,
    regex: Regex,
}

fn action_patterns() -> &'static Vec<ActionPattern> {
    static PATTERNS: OnceLock<Vec<ActionPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let def = |action_id, pattern: &str| ActionPattern {
            action_id,
            regex: Regex::new(pattern).expect("action pattern regex"),
        };
        vec![
            def("encender_luz", r"(?i)\b(enciende|prende|encender)\b.*\bluz"),
            def("apagar_luz", r"(?i)\b(apaga|apagar)\b.*\bluz"),
            // Checked before the weather and plain-alarm patterns: a
            // conditional fragment mentions rain and an alarm at once.
            def(
                "programar_alarma_condicional",
                r"(?i)\bsi\s+(llueve|nieva|hace\s+frío)\b.*\b(alarma|despertador)",
            ),
            def("consultar_tiempo", r"(?i)\b(tiempo|clima|lloverá|llueve)\b"),
            def("programar_alarma", r"(?i)\b(alarma|despertador|despiértame)\b"),
            def("reproducir_musica", r"(?i)\b(pon|reproduce|escuchar)\b.*\b(música|musica|canción|cancion)"),
            def("poner_temporizador", r"(?i)\b(temporizador|cuenta\s+atrás)\b"),
            def("crear_github_issue", r"(?i)\b(crea|abre|crear)\b.*\b(incidencia|issue|tarea)\b"),
            def("asignar_issue", r"(?i)\b(asigna|asignar)\b.*\b(incidencia|issue|tarea)\b"),
            def("enviar_mensaje", r"(?i)\b(envía|envia|manda)\b.*\b(mensaje|aviso)\b"),
        ]
    })
}

fn connector_split() -> &'static Regex {
    static SPLIT: OnceLock<Regex> = OnceLock::new();
    SPLIT.get_or_init(|| {
        Regex::new(r"(?i)\s*(?:\by\s+si\b|\by\b|\btambién\b|\bdespués\b|\bluego\b|,|;)\s*")
            .expect("connector regex")
    })
}

/// Split on multi-action connectors, then match the per-action pattern
/// catalogue on each fragment, filling arguments from the fragment's
/// extracted entities according to the action's declared schema.
pub fn pattern_decompose(utterance: &str, actions: &ToolActionRegistry) -> Vec<Subtask> {
    let mut subtasks = Vec::new();
    let mut counter = 0usize;

    for fragment in connector_split().split(utterance) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            continue;
        }

        let mut matched: Option<&ActionPattern> = None;
        for pattern in action_patterns() {
            // The conditional-alarm pattern needs the full utterance:
            // "si llueve" often lands in the preceding fragment.
            let haystack = if pattern.action_id == "programar_alarma_condicional" {
                utterance
            } else {
                fragment
            };
            if pattern.regex.is_match(haystack)
                && (pattern.action_id != "programar_alarma_condicional"
                    || fragment.to_lowercase().contains("alarma")
                    || fragment.to_lowercase().contains("despertador"))
            {
                matched = Some(pattern);
                break;
            }
        }
        let Some(pattern) = matched else {
            continue;
        };
        let Some(action) = actions.get(pattern.action_id) else {
            continue;
        };

        counter += 1;
        let mut subtask = Subtask::new(format!("pt-{counter}"), pattern.action_id);
        subtask.description = fragment.to_owned();
        subtask.confidence = PATTERN_CONFIDENCE;

        let extracted = pattern_extract(fragment);
        for param in &action.params {
            if let Some(entity_type) = EntityType::for_slot(&param.name) {
                if let Some(entity) = extracted
                    .iter()
                    .filter(|e| e.entity_type == entity_type)
                    .max_by(|a, b| {
                        a.confidence
                            .partial_cmp(&b.confidence)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                {
                    let value = mando_dialog::normalize::normalize_value(
                        entity_type,
                        &entity.value,
                    );
                    subtask.entities.insert(param.name.clone(), value.into());
                }
            } else if param.name == "condicion" {
                let lowered = utterance.to_lowercase();
                if lowered.contains("si llueve") {
                    subtask.entities.insert("condicion".into(), "si_llueve".into());
                } else if lowered.contains("si nieva") {
                    subtask.entities.insert("condicion".into(), "si_nieva".into());
                }
            }
        }

        subtasks.push(subtask);
    }

    subtasks
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
