//! Classification prompt assembly.

use mando_index::SearchHit;

/// Build the classification prompt: utterance, retrieved labeled
/// examples, the set of known intents, and the JSON answer contract.
pub fn classification_prompt(
    utterance: &str,
    hits: &[SearchHit],
    intent_ids: &[&str],
    conversation_summary: Option<&str>,
) -> String {
    let mut prompt = String::with_capacity(1024);

    prompt.push_str(
        "Eres el clasificador de intenciones de un asistente de voz. \
         Clasifica la frase del usuario en una de las intenciones conocidas.\n\n",
    );

    if let Some(summary) = conversation_summary.filter(|s| !s.is_empty()) {
        prompt.push_str("Contexto de la conversación:\n");
        prompt.push_str(summary);
        prompt.push_str("\n\n");
    }

    if !hits.is_empty() {
        prompt.push_str("Ejemplos similares (frase → intención):\n");
        for hit in hits {
            prompt.push_str(&format!(
                "- \"{}\" → {} (similitud {:.2})\n",
                hit.doc.content, hit.doc.intent_id, hit.similarity
            ));
        }
        prompt.push('\n');
    }

    prompt.push_str("Intenciones conocidas: ");
    prompt.push_str(&intent_ids.join(", "));
    prompt.push_str("\n\n");

    prompt.push_str(&format!("Frase del usuario: \"{utterance}\"\n\n"));
    prompt.push_str(
        "Responde SOLO con un objeto JSON:\n\
         {\"intent\": \"<intent_id>\", \"confidence\": <0.0-1.0>, \
         \"entities\": {\"<tipo>\": \"<valor>\"}, \"reasoning\": \"<breve>\"}\n",
    );

    prompt
}
