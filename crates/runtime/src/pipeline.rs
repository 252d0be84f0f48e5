//! The per-utterance request pipeline.
//!
//! Resolve the session and take its turn lock, classify (or continue a
//! pending slot dialog), extract and validate entities, drive the slot
//! machine, and — once Ready — decompose, validate, resolve, execute,
//! and track. Every turn appends to the session and returns a
//! structured reply; failures surface inside the outcome, not past it.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use mando_catalog::IntentCatalog;
use mando_dialog::SlotOutcome;
use mando_domain::cancel::CancelToken;
use mando_domain::entity::EntityType;
use mando_domain::error::Result;
use mando_domain::intent::{ClassificationResult, FallbackLevel, IntentDefinition, HELP_INTENT};
use mando_domain::subtask::{Subtask, TaskExecutionResult};
use mando_domain::vote::AgreementLevel;
use mando_sessions::{Session, SessionState, Turn};

use crate::state::Runtime;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / reply types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct UtteranceRequest {
    /// Resume this session when present and still alive.
    pub session_id: Option<String>,
    pub user_id: String,
    /// The user utterance (already transcribed when it arrived as audio).
    pub text: String,
    /// Device/channel metadata merged into the session context
    /// (`device_type`, `location`, `hour_of_day`, …).
    pub metadata: HashMap<String, String>,
}

/// What the assistant says back.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantReply {
    /// Terminal answer for this request.
    Answer { text: String },
    /// A slot-filling follow-up question; the session waits for the
    /// answer.
    FollowUp { slot: String, question: String },
    /// Slot filling gave up on a slot after too many attempts.
    Abandoned { slot: String, text: String },
    /// Classification could not do better than the help intent.
    Clarification { text: String },
}

impl AssistantReply {
    pub fn text(&self) -> &str {
        match self {
            AssistantReply::Answer { text } => text,
            AssistantReply::FollowUp { question, .. } => question,
            AssistantReply::Abandoned { text, .. } => text,
            AssistantReply::Clarification { text } => text,
        }
    }
}

/// Structured result of one turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub session_id: String,
    pub turn_id: u64,
    pub reply: AssistantReply,
    pub classification: Option<ClassificationResult>,
    pub execution: Option<TaskExecutionResult>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Runtime {
    /// Handle one utterance end to end.
    ///
    /// Only session-store failures surface as errors; classification and
    /// execution failures come back inside the outcome.
    pub async fn handle_utterance(
        &self,
        request: UtteranceRequest,
        cancel: &CancelToken,
    ) -> Result<TurnOutcome> {
        let state = self.state().clone();

        let (mut session, _is_new) = state
            .sessions
            .create_or_load(request.session_id.as_deref(), &request.user_id)
            .await?;

        // Turns within a session are totally ordered: hold the per-
        // session permit for the remainder of the request.
        let _permit = state.sessions.lock(&session.session_id).await?;
        if let Some(fresh) = state.sessions.load(&session.session_id).await? {
            session = fresh;
        }

        for (key, value) in &request.metadata {
            session
                .context
                .metadata
                .insert(key.clone(), value.clone());
        }

        let catalog = state.intents.snapshot();

        // Pending slot dialog resumes without reclassifying.
        let (intent_id, classification, pending) = match session.context.pending_slots.clone() {
            Some(p) if catalog.get(&p.intent_id).is_some() => (p.intent_id.clone(), None, Some(p)),
            _ => {
                let classification = self.classify(&request.text, &session, &catalog, cancel).await;
                (classification.intent_id.clone(), Some(classification), None)
            }
        };

        let Some(intent) = catalog.get(&intent_id).filter(|_| intent_id != HELP_INTENT).cloned()
        else {
            let reply = AssistantReply::Clarification {
                text: "No estoy seguro de qué necesitas. ¿Puedes decirlo de otra forma?".into(),
            };
            session.context.pending_slots = None;
            return self
                .finish_turn(session, &request.text, reply, classification, None, BTreeMap::new())
                .await;
        };

        // Entity extraction over the intent's slot types.
        let requested: Vec<EntityType> = intent
            .required_slots
            .iter()
            .chain(intent.optional_slots.iter())
            .filter_map(|slot| EntityType::for_slot(slot))
            .collect();
        let recent = session.recent_turns(5).to_vec();
        let mut extracted = state
            .recognizer
            .extract(&request.text, &session.context, &recent, &requested)
            .await;
        if let Some(ref c) = classification {
            extracted.extend(c.entities.iter().cloned());
        }
        let validated = state.validator.validate_all(&request.text, extracted).await;

        let now = Utc::now();
        for entity in &validated {
            session.context.cache_entity(
                entity.entity_type.as_str(),
                entity.normalized.clone(),
                entity.confidence,
                now,
            );
        }
        session.context.active_intent = Some(intent.intent_id.clone());
        session.context.push_topic(if intent.expert_domain.is_empty() {
            intent.intent_id.clone()
        } else {
            intent.expert_domain.clone()
        });

        // Slot filling.
        let mut pending = pending.unwrap_or_else(|| state.slot_machine.start(&intent));
        let outcome = state
            .slot_machine
            .advance(&intent, &mut pending, &validated)
            .await;
        let slots = pending.filled.clone();

        match outcome {
            SlotOutcome::Question { slot, question, .. } => {
                session.context.pending_slots = Some(pending);
                session.state = SessionState::Waiting;
                let reply = AssistantReply::FollowUp { slot, question };
                self.finish_turn(session, &request.text, reply, classification, None, slots)
                    .await
            }
            SlotOutcome::Abandoned { slot, message } => {
                session.context.pending_slots = None;
                session.state = SessionState::Active;
                let reply = AssistantReply::Abandoned {
                    slot,
                    text: message,
                };
                self.finish_turn(session, &request.text, reply, classification, None, slots)
                    .await
            }
            SlotOutcome::Ready => {
                session.context.pending_slots = None;
                session.state = SessionState::Active;

                let execution = self
                    .execute_intent(&intent, &slots, &request.text, &session, cancel)
                    .await;
                let reply = AssistantReply::Answer {
                    text: reply_for_execution(execution.as_ref()),
                };
                if execution.as_ref().is_none_or(|e| e.all_successful) {
                    session.successful_turns += 1;
                }
                self.finish_turn(session, &request.text, reply, classification, execution, slots)
                    .await
            }
        }
    }

    // ── classification ──────────────────────────────────────────────

    /// Classify via the voting engine when MoE is enabled, else (and on
    /// failed consensus) the retrieval classifier. Never errors — the
    /// worst outcome is a help classification.
    async fn classify(
        &self,
        text: &str,
        session: &Session,
        catalog: &IntentCatalog,
        cancel: &CancelToken,
    ) -> ClassificationResult {
        let state = self.state();

        if state.config.moe.enabled {
            let request_id = uuid::Uuid::new_v4().to_string();
            let round = state
                .voting
                .run(&request_id, text, &session.context, catalog, cancel)
                .await;
            if round.consensus.agreement_level != AgreementLevel::Failed {
                return ClassificationResult {
                    intent_id: round.consensus.final_intent.clone(),
                    confidence: round.consensus.confidence,
                    examples_used: Vec::new(),
                    entities: round.consensus.merged_entities.clone(),
                    fallback_level: FallbackLevel::None,
                    reasoning: round.consensus.reasoning.clone(),
                    latency_ms: (round.finished_at - round.started_at)
                        .num_milliseconds()
                        .max(0) as u64,
                };
            }
            tracing::warn!("voting consensus failed, using retrieval classifier");
        }

        match state
            .classifier
            .classify(text, &session.context, catalog)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "classification failed outright");
                ClassificationResult::help(
                    FallbackLevel::Generic,
                    0.0,
                    format!("classification failed: {e}"),
                )
            }
        }
    }

    // ── execution ───────────────────────────────────────────────────

    /// Decompose, validate, resolve, and execute. `None` when nothing
    /// executable came out of the request.
    async fn execute_intent(
        &self,
        intent: &IntentDefinition,
        slots: &BTreeMap<String, String>,
        utterance: &str,
        session: &Session,
        cancel: &CancelToken,
    ) -> Option<TaskExecutionResult> {
        let state = self.state();

        let mut candidates = state.decomposer.decompose(utterance, &state.actions).await;

        // The intent's own tool action, parameterized by the filled
        // slots, anchors the plan.
        if let Some(action_id) = intent.tool_action_id.as_deref() {
            if let Some(action) = state.actions.get(action_id) {
                let mut primary = Subtask::new(format!("main-{}", intent.intent_id), action_id);
                primary.description = utterance.chars().take(200).collect();
                primary.confidence = 0.95;
                primary.priority = mando_domain::subtask::Priority::High;
                for (slot, value) in slots {
                    if action.params.iter().any(|p| &p.name == slot) {
                        primary
                            .entities
                            .insert(slot.clone(), serde_json::Value::String(value.clone()));
                    }
                }
                candidates.push(primary);
            }
        }

        // Dedupe the union, higher decomposition confidence winning.
        let mut best: HashMap<String, Subtask> = HashMap::new();
        for subtask in candidates {
            let key = subtask.canonical_key();
            match best.get(&key) {
                Some(existing) if existing.confidence >= subtask.confidence => {}
                _ => {
                    best.insert(key, subtask);
                }
            }
        }
        let candidates: Vec<Subtask> = best.into_values().collect();

        let valid = mando_orchestrator::validate_batch(candidates, &state.actions);
        if valid.is_empty() {
            return None;
        }

        let mut history: Vec<String> = session
            .recent_turns(5)
            .iter()
            .map(|t| t.user_text.clone())
            .collect();
        history.push(utterance.to_owned());

        let plan = match state.resolver.resolve(valid, &history) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::error!(error = %e, "dependency resolution failed");
                return None;
            }
        };

        Some(
            state
                .orchestrator
                .execute(plan, &session.session_id, cancel)
                .await,
        )
    }

    // ── turn bookkeeping ────────────────────────────────────────────

    async fn finish_turn(
        &self,
        mut session: Session,
        user_text: &str,
        reply: AssistantReply,
        classification: Option<ClassificationResult>,
        execution: Option<TaskExecutionResult>,
        slots: BTreeMap<String, String>,
    ) -> Result<TurnOutcome> {
        let state = self.state();

        let turn_id = session.next_turn_id();
        let turn = Turn {
            turn_id,
            user_text: user_text.to_owned(),
            assistant_text: reply.text().to_owned(),
            intent_id: classification
                .as_ref()
                .map(|c| c.intent_id.clone())
                .or_else(|| session.context.active_intent.clone()),
            confidence: classification.as_ref().map(|c| c.confidence),
            slots_snapshot: slots,
            created_at: Utc::now(),
        };
        session.append_turn(turn)?;
        state.sessions.save(&session).await?;

        if session.turns.len() > state.config.sessions.compaction_window_turns {
            state.sessions.compact(&session.session_id).await?;
        }

        Ok(TurnOutcome {
            session_id: session.session_id,
            turn_id,
            reply,
            classification,
            execution,
        })
    }
}

/// User-facing summary of an execution result.
fn reply_for_execution(execution: Option<&TaskExecutionResult>) -> String {
    let Some(execution) = execution else {
        return "De acuerdo.".into();
    };

    if execution.all_successful {
        if execution.total_tasks == 1 {
            "Hecho.".into()
        } else {
            format!(
                "Hecho: {} acciones completadas.",
                execution.completed_tasks
            )
        }
    } else if !execution.rolled_back.is_empty() {
        "No se ha podido completar la acción; los cambios se han revertido.".into()
    } else if execution.completed_tasks > 0 {
        format!(
            "Completadas {} de {} acciones; el resto ha fallado.",
            execution.completed_tasks, execution.total_tasks
        )
    } else {
        "No se ha podido completar la acción.".into()
    }
}
