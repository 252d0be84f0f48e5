//! Expert participants: role prompts and vote casting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mando_domain::cancel::CancelToken;
use mando_domain::config::{ExpertRole, ParticipantConfig};
use mando_domain::entity::{EntityType, ExtractedEntity, ExtractionSource};
use mando_domain::subtask::Subtask;
use mando_domain::trace::TraceEvent;
use mando_domain::vote::{Vote, VoteStatus};
use mando_providers::json::extract_json;
use mando_providers::traits::{CompletionRequest, LlmProvider};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Expert
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One expert in the voting panel: a participant configuration bound to
/// its LLM provider.
pub struct Expert {
    pub cfg: ParticipantConfig,
    pub llm: Arc<dyn LlmProvider>,
}

/// Everything an expert sees when voting.
pub struct VoteRequest<'a> {
    pub utterance: &'a str,
    pub conversation_summary: Option<&'a str>,
    pub intent_ids: &'a [&'a str],
    /// Votes of the previous round, present from debate round 2 on.
    pub prior_votes: &'a [Vote],
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_framing(role: ExpertRole) -> &'static str {
    match role {
        ExpertRole::Literalist => {
            "Interpreta la frase de forma literal, sin suposiciones sobre lo que \
             el usuario podría haber querido decir."
        }
        ExpertRole::Contextualist => {
            "Apóyate en el contexto conversacional: referencias implícitas, \
             entidades mencionadas antes y el tema actual."
        }
        ExpertRole::ActionPlanner => {
            "Céntrate en qué acciones ejecutables implica la petición y qué \
             subtareas concretas habría que lanzar."
        }
    }
}

/// Build the expert's prompt for one round.
pub fn vote_prompt(role: ExpertRole, request: &VoteRequest<'_>) -> String {
    let mut prompt = String::with_capacity(1024);

    prompt.push_str("Eres un experto clasificador de un asistente de voz. ");
    prompt.push_str(role_framing(role));
    prompt.push_str("\n\n");

    if let Some(summary) = request.conversation_summary.filter(|s| !s.is_empty()) {
        prompt.push_str("Contexto:\n");
        prompt.push_str(summary);
        prompt.push_str("\n\n");
    }

    if !request.prior_votes.is_empty() {
        prompt.push_str("Votos de la ronda anterior:\n");
        for vote in request.prior_votes {
            if vote.status.is_valid() {
                prompt.push_str(&format!(
                    "- {} ({}): {} con confianza {:.2} — {}\n",
                    vote.llm_id,
                    vote.role.as_str(),
                    vote.intent,
                    vote.confidence,
                    vote.reasoning
                ));
            }
        }
        prompt.push_str(
            "\nReconsidera tu respuesta: mantén tu voto o revísalo a la luz \
             de los demás.\n\n",
        );
    }

    prompt.push_str("Intenciones conocidas: ");
    prompt.push_str(&request.intent_ids.join(", "));
    prompt.push_str("\n\n");
    prompt.push_str(&format!("Frase del usuario: \"{}\"\n\n", request.utterance));
    prompt.push_str(
        "Responde SOLO con un objeto JSON:\n\
         {\"intent\": \"<intent_id>\", \"confidence\": <0.0-1.0>, \
         \"entities\": {\"<tipo>\": \"<valor>\"}, \
         \"subtasks\": [{\"action\": \"<action_id>\", \"description\": \"<desc>\", \
         \"entities\": {}}], \"reasoning\": \"<breve>\"}\n",
    );

    prompt
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vote casting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cast one vote. Never errors: failures, timeouts, unparsable output,
/// and cancellation all come back as Failed/Timeout vote records that do
/// not count toward consensus.
pub async fn cast_vote(
    expert: &Expert,
    request: &VoteRequest<'_>,
    timeout: Duration,
    cancel: &CancelToken,
) -> Vote {
    let llm_id = expert.cfg.llm_id.clone();
    let role = expert.cfg.role;
    let weight = expert.cfg.weight;

    if cancel.is_cancelled() {
        return Vote::failed(llm_id, role, weight, VoteStatus::Failed, "cancelled");
    }

    let prompt = vote_prompt(role, request);
    let start = Instant::now();

    let completion =
        tokio::time::timeout(timeout, expert.llm.complete(CompletionRequest::new(prompt))).await;

    let duration_ms = start.elapsed().as_millis() as u64;

    let text = match completion {
        Err(_) => {
            TraceEvent::VoteFailed {
                llm_id: llm_id.clone(),
                reason: "timeout".into(),
            }
            .emit();
            return Vote::failed(llm_id, role, weight, VoteStatus::Timeout, "vote timed out");
        }
        Ok(Err(e)) => {
            TraceEvent::VoteFailed {
                llm_id: llm_id.clone(),
                reason: e.to_string(),
            }
            .emit();
            return Vote::failed(llm_id, role, weight, VoteStatus::Failed, e.to_string());
        }
        Ok(Ok(text)) => text,
    };

    if cancel.is_cancelled() {
        return Vote::failed(llm_id, role, weight, VoteStatus::Failed, "cancelled");
    }

    match parse_vote(&llm_id, role, weight, &text, request.intent_ids, duration_ms) {
        Ok(vote) => {
            TraceEvent::VoteCast {
                llm_id: vote.llm_id.clone(),
                role: vote.role.as_str().into(),
                intent: vote.intent.clone(),
                confidence: vote.confidence,
                duration_ms,
            }
            .emit();
            vote
        }
        Err(reason) => {
            TraceEvent::VoteFailed {
                llm_id: llm_id.clone(),
                reason: reason.clone(),
            }
            .emit();
            Vote::failed(llm_id, role, weight, VoteStatus::Failed, reason)
        }
    }
}

fn parse_vote(
    llm_id: &str,
    role: ExpertRole,
    weight: f64,
    text: &str,
    intent_ids: &[&str],
    duration_ms: u64,
) -> std::result::Result<Vote, String> {
    let value = extract_json(llm_id, text).map_err(|e| e.to_string())?;

    let intent = value
        .get("intent")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "vote missing 'intent'".to_owned())?
        .to_owned();
    if !intent_ids.contains(&intent.as_str()) {
        return Err(format!("vote for unknown intent \"{intent}\""));
    }

    let confidence = value
        .get("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);

    let entities = value
        .get("entities")
        .and_then(|v| v.as_object())
        .map(|map| {
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
        })
        .unwrap_or_default();

    let proposed_subtasks = value
        .get("subtasks")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let action = item.get("action").and_then(|a| a.as_str())?;
                    let mut subtask =
                        Subtask::new(uuid::Uuid::new_v4().to_string(), action);
                    subtask.description = item
                        .get("description")
                        .and_then(|d| d.as_str())
                        .unwrap_or_default()
                        .to_owned();
                    subtask.confidence = confidence;
                    if let Some(entities) = item.get("entities").and_then(|e| e.as_object()) {
                        for (k, v) in entities {
                            subtask.entities.insert(k.clone(), v.clone());
                        }
                    }
                    Some(subtask)
                })
                .collect()
        })
        .unwrap_or_default();

    let reasoning = value
        .get("reasoning")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_owned();

    Ok(Vote {
        vote_id: uuid::Uuid::new_v4().to_string(),
        llm_id: llm_id.to_owned(),
        role,
        weight,
        intent,
        confidence,
        entities,
        proposed_subtasks,
        reasoning,
        status: VoteStatus::Completed,
        duration_ms,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
