//! Slot-filling state machine.
//!
//! Per turn: merge newly extracted entities into the pending slots,
//! compute what is still missing, and either hand off (Ready) or ask the
//! next follow-up question. A slot asked more than `max_attempts` times
//! abandons with an apology.

use std::sync::Arc;

use mando_domain::config::SlotFillingConfig;
use mando_domain::entity::{EntityType, ExtractedEntity};
use mando_domain::intent::IntentDefinition;
use mando_domain::trace::TraceEvent;
use mando_providers::traits::{CompletionRequest, LlmProvider};
use mando_sessions::PendingSlots;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// States
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dialog states: `Idle → Gathering → Ready → Executing → (Idle | Error)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    Idle,
    Gathering,
    Ready,
    Executing,
    Error,
}

impl DialogState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: DialogState) -> bool {
        use DialogState::*;
        matches!(
            (self, next),
            (Idle, Gathering)
                | (Idle, Ready)
                | (Gathering, Gathering)
                | (Gathering, Ready)
                | (Gathering, Error)
                | (Ready, Executing)
                | (Executing, Idle)
                | (Executing, Error)
                | (Error, Idle)
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of advancing the machine one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutcome {
    /// All required slots filled; hand off to decomposition.
    Ready,
    /// A follow-up question for the first missing slot.
    Question {
        slot: String,
        question: String,
        attempt: u32,
    },
    /// The slot exceeded `max_attempts`; the intent is abandoned.
    Abandoned { slot: String, message: String },
}

impl SlotOutcome {
    /// The dialog state this outcome lands in.
    pub fn state(&self) -> DialogState {
        match self {
            SlotOutcome::Ready => DialogState::Ready,
            SlotOutcome::Question { .. } => DialogState::Gathering,
            SlotOutcome::Abandoned { .. } => DialogState::Error,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SlotMachine {
    llm: Option<Arc<dyn LlmProvider>>,
    cfg: SlotFillingConfig,
}

impl SlotMachine {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>, cfg: SlotFillingConfig) -> Self {
        Self { llm, cfg }
    }

    /// Fresh pending-slot state for an intent.
    pub fn start(&self, intent: &IntentDefinition) -> PendingSlots {
        PendingSlots {
            intent_id: intent.intent_id.clone(),
            filled: Default::default(),
            confidences: Default::default(),
            missing: intent.required_slots.clone(),
            attempts: Default::default(),
        }
    }

    /// Advance one turn: merge extractions, recompute missing slots, and
    /// decide Ready / Question / Abandoned.
    pub async fn advance(
        &self,
        intent: &IntentDefinition,
        pending: &mut PendingSlots,
        extracted: &[ExtractedEntity],
    ) -> SlotOutcome {
        self.merge(intent, pending, extracted);

        pending.missing = intent
            .required_slots
            .iter()
            .filter(|slot| !pending.filled.contains_key(*slot))
            .cloned()
            .collect();

        let Some(slot) = pending.missing.first().cloned() else {
            return SlotOutcome::Ready;
        };

        let attempt = pending.attempts.entry(slot.clone()).or_insert(0);
        *attempt += 1;
        let attempt = *attempt;

        if attempt > self.cfg.max_attempts {
            TraceEvent::SlotAbandoned {
                intent: intent.intent_id.clone(),
                slot: slot.clone(),
                attempts: attempt - 1,
            }
            .emit();
            return SlotOutcome::Abandoned {
                message: format!(
                    "Lo siento, no he conseguido entender el dato \"{slot}\" y no puedo \
                     completar la petición."
                ),
                slot,
            };
        }

        let question = self.question_for(intent, &slot).await;
        TraceEvent::SlotQuestionAsked {
            intent: intent.intent_id.clone(),
            slot: slot.clone(),
            attempt,
        }
        .emit();

        SlotOutcome::Question {
            slot,
            question,
            attempt,
        }
    }

    /// Merge extracted entities into the filled slots, preserving
    /// higher-confidence values. Both required and optional slots fill.
    fn merge(
        &self,
        intent: &IntentDefinition,
        pending: &mut PendingSlots,
        extracted: &[ExtractedEntity],
    ) {
        let slots = intent
            .required_slots
            .iter()
            .chain(intent.optional_slots.iter());

        for slot in slots {
            let Some(slot_type) = EntityType::for_slot(slot) else {
                continue;
            };
            let candidate = extracted
                .iter()
                .filter(|e| {
                    e.entity_type == slot_type && e.confidence >= self.cfg.confidence_threshold
                })
                .max_by(|a, b| {
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            let Some(candidate) = candidate else {
                continue;
            };

            let existing = pending.confidences.get(slot).copied().unwrap_or(0.0);
            if candidate.confidence > existing {
                pending
                    .filled
                    .insert(slot.clone(), candidate.normalized.clone());
                pending.confidences.insert(slot.clone(), candidate.confidence);
            }
        }
    }

    // ── question generation ─────────────────────────────────────────

    /// Question source order: intent template, dynamic LLM question,
    /// generic per-type default.
    async fn question_for(&self, intent: &IntentDefinition, slot: &str) -> String {
        if let Some(template) = intent.slot_prompts.get(slot) {
            return template.replace("{slot}", slot);
        }

        if self.cfg.enable_dynamic_questions {
            if let Some(ref llm) = self.llm {
                let prompt = format!(
                    "Eres un asistente de voz en español. Para la intención \
                     \"{}\" ({}) falta el dato \"{slot}\". Formula UNA pregunta \
                     breve y natural para pedirlo. Responde solo la pregunta.",
                    intent.intent_id, intent.description
                );
                match llm.complete(CompletionRequest::new(prompt)).await {
                    Ok(question) if !question.trim().is_empty() => {
                        return question.trim().to_owned();
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "dynamic question unavailable");
                    }
                }
            }
        }

        generic_question(slot)
    }
}

/// Generic per-type default questions.
fn generic_question(slot: &str) -> String {
    match EntityType::for_slot(slot) {
        Some(EntityType::Location) => "¿En qué lugar?".into(),
        Some(EntityType::Time) => "¿A qué hora?".into(),
        Some(EntityType::Date) => "¿Qué día?".into(),
        Some(EntityType::Temperature) => "¿Qué temperatura?".into(),
        Some(EntityType::Person) => "¿A qué persona?".into(),
        Some(EntityType::Room) => "¿En qué habitación?".into(),
        Some(EntityType::Artist) => "¿Qué artista?".into(),
        Some(EntityType::Genre) => "¿Qué género musical?".into(),
        Some(EntityType::Song) => "¿Qué canción?".into(),
        None => format!("¿Puedes darme más detalles sobre \"{slot}\"?"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use mando_domain::entity::ExtractionSource;
    use mando_providers::testing::MockLlm;
    use std::collections::HashMap;

    fn alarm_intent() -> IntentDefinition {
        IntentDefinition {
            intent_id: "programar_alarma".into(),
            description: "Programar una alarma".into(),
            expert_domain: "utilidades".into(),
            examples: vec!["ponme una alarma".into()],
            required_slots: vec!["hora".into()],
            optional_slots: vec!["fecha".into()],
            slot_prompts: HashMap::new(),
            tool_action_id: Some("programar_alarma".into()),
            confidence_threshold: Some(0.85),
            max_rag_examples: None,
        }
    }

    fn entity(t: EntityType, value: &str, normalized: &str, confidence: f64) -> ExtractedEntity {
        let mut e = ExtractedEntity::new(t, value, confidence, ExtractionSource::Pattern);
        e.normalized = normalized.into();
        e
    }

    fn machine() -> SlotMachine {
        SlotMachine::new(None, SlotFillingConfig::default())
    }

    // ── advance ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn missing_slot_asks_generic_question() {
        let machine = machine();
        let intent = alarm_intent();
        let mut pending = machine.start(&intent);

        let outcome = machine.advance(&intent, &mut pending, &[]).await;
        match outcome {
            SlotOutcome::Question { slot, question, attempt } => {
                assert_eq!(slot, "hora");
                assert_eq!(question, "¿A qué hora?");
                assert_eq!(attempt, 1);
            }
            other => panic!("expected question, got {other:?}"),
        }
        assert_eq!(pending.missing, vec!["hora"]);
    }

    #[tokio::test]
    async fn filled_slot_reaches_ready() {
        let machine = machine();
        let intent = alarm_intent();
        let mut pending = machine.start(&intent);

        let extracted = [entity(EntityType::Time, "siete y media", "07:30", 0.8)];
        let outcome = machine.advance(&intent, &mut pending, &extracted).await;
        assert_eq!(outcome, SlotOutcome::Ready);
        assert_eq!(pending.filled["hora"], "07:30");
        assert!(pending.missing.is_empty());
    }

    #[tokio::test]
    async fn spec_two_turn_flow() {
        // Turn 1: "ponme una alarma" — no time; ask for it.
        let machine = machine();
        let intent = alarm_intent();
        let mut pending = machine.start(&intent);

        let outcome = machine.advance(&intent, &mut pending, &[]).await;
        assert!(matches!(outcome, SlotOutcome::Question { ref slot, .. } if slot == "hora"));

        // Turn 2: "a las siete y media" — normalized 07:30, ready.
        let extracted = [entity(EntityType::Time, "siete y media", "07:30", 0.85)];
        let outcome = machine.advance(&intent, &mut pending, &extracted).await;
        assert_eq!(outcome, SlotOutcome::Ready);
        assert_eq!(pending.filled["hora"], "07:30");
    }

    #[tokio::test]
    async fn low_confidence_does_not_fill() {
        let machine = machine();
        let intent = alarm_intent();
        let mut pending = machine.start(&intent);

        let extracted = [entity(EntityType::Time, "7", "07:00", 0.2)];
        let outcome = machine.advance(&intent, &mut pending, &extracted).await;
        assert!(matches!(outcome, SlotOutcome::Question { .. }));
        assert!(pending.filled.is_empty());
    }

    #[tokio::test]
    async fn higher_confidence_replaces_lower() {
        let machine = machine();
        let intent = alarm_intent();
        let mut pending = machine.start(&intent);

        let first = [entity(EntityType::Time, "7", "07:00", 0.6)];
        machine.advance(&intent, &mut pending, &first).await;
        assert_eq!(pending.filled["hora"], "07:00");

        let second = [entity(EntityType::Time, "07:30", "07:30", 0.95)];
        machine.advance(&intent, &mut pending, &second).await;
        assert_eq!(pending.filled["hora"], "07:30");

        // A weaker re-extraction does not regress the slot.
        let third = [entity(EntityType::Time, "8", "08:00", 0.55)];
        machine.advance(&intent, &mut pending, &third).await;
        assert_eq!(pending.filled["hora"], "07:30");
    }

    #[tokio::test]
    async fn optional_slots_fill_but_never_block() {
        let machine = machine();
        let intent = alarm_intent();
        let mut pending = machine.start(&intent);

        let extracted = [
            entity(EntityType::Time, "07:30", "07:30", 0.9),
            entity(EntityType::Date, "mañana", "mañana", 0.9),
        ];
        let outcome = machine.advance(&intent, &mut pending, &extracted).await;
        assert_eq!(outcome, SlotOutcome::Ready);
        assert_eq!(pending.filled["fecha"], "mañana");
    }

    #[tokio::test]
    async fn abandonment_after_max_attempts() {
        let machine = machine();
        let intent = alarm_intent();
        let mut pending = machine.start(&intent);

        for expected in 1..=3 {
            match machine.advance(&intent, &mut pending, &[]).await {
                SlotOutcome::Question { attempt, .. } => assert_eq!(attempt, expected),
                other => panic!("expected question, got {other:?}"),
            }
        }

        match machine.advance(&intent, &mut pending, &[]).await {
            SlotOutcome::Abandoned { slot, message } => {
                assert_eq!(slot, "hora");
                assert!(message.contains("Lo siento"));
            }
            other => panic!("expected abandonment, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn template_question_wins() {
        let machine = machine();
        let mut intent = alarm_intent();
        intent
            .slot_prompts
            .insert("hora".into(), "¿A qué hora pongo la alarma?".into());
        let mut pending = machine.start(&intent);

        match machine.advance(&intent, &mut pending, &[]).await {
            SlotOutcome::Question { question, .. } => {
                assert_eq!(question, "¿A qué hora pongo la alarma?");
            }
            other => panic!("expected question, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dynamic_question_used_when_no_template() {
        let llm: Arc<dyn LlmProvider> =
            Arc::new(MockLlm::new("primary", "¿Para qué hora quieres la alarma?"));
        let machine = SlotMachine::new(Some(llm), SlotFillingConfig::default());
        let intent = alarm_intent();
        let mut pending = machine.start(&intent);

        match machine.advance(&intent, &mut pending, &[]).await {
            SlotOutcome::Question { question, .. } => {
                assert_eq!(question, "¿Para qué hora quieres la alarma?");
            }
            other => panic!("expected question, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dynamic_question_failure_falls_back_to_generic() {
        let llm = Arc::new(MockLlm::new("primary", ""));
        llm.push_failure("HTTP 500: down");
        let machine = SlotMachine::new(
            Some(llm as Arc<dyn LlmProvider>),
            SlotFillingConfig::default(),
        );
        let intent = alarm_intent();
        let mut pending = machine.start(&intent);

        match machine.advance(&intent, &mut pending, &[]).await {
            SlotOutcome::Question { question, .. } => assert_eq!(question, "¿A qué hora?"),
            other => panic!("expected question, got {other:?}"),
        }
    }

    // ── states ──────────────────────────────────────────────────────

    #[test]
    fn legal_transitions() {
        use DialogState::*;
        assert!(Idle.can_transition_to(Gathering));
        assert!(Gathering.can_transition_to(Ready));
        assert!(Gathering.can_transition_to(Gathering));
        assert!(Gathering.can_transition_to(Error));
        assert!(Ready.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Idle));
        assert!(Error.can_transition_to(Idle));

        assert!(!Ready.can_transition_to(Gathering));
        assert!(!Idle.can_transition_to(Executing));
        assert!(!Executing.can_transition_to(Gathering));
    }

    #[test]
    fn outcome_maps_to_state() {
        assert_eq!(SlotOutcome::Ready.state(), DialogState::Ready);
        assert_eq!(
            SlotOutcome::Question {
                slot: "hora".into(),
                question: "¿A qué hora?".into(),
                attempt: 1
            }
            .state(),
            DialogState::Gathering
        );
        assert_eq!(
            SlotOutcome::Abandoned {
                slot: "hora".into(),
                message: "lo siento".into()
            }
            .state(),
            DialogState::Error
        );
    }
}
