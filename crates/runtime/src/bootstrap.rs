//! Startup seeding of the RAG corpus.
//!
//! Embeds every intent's example utterances and upserts them into the
//! vector index with `doc_id = {intent_id}:{n}`.

use mando_index::EmbeddingDocument;

use mando_domain::error::Result;

use crate::state::AppState;

/// Seed the vector index from the current intent catalogue. Returns the
/// number of documents upserted.
pub async fn seed_examples(state: &AppState) -> Result<usize> {
    let catalog = state.intents.snapshot();
    let mut seeded = 0;

    for intent in catalog.iter() {
        for (n, example) in intent.examples.iter().enumerate() {
            let vector = state.embedder.embed(example).await?;
            let mut doc = EmbeddingDocument::new(
                format!("{}:{n}", intent.intent_id),
                example.clone(),
                intent.intent_id.clone(),
                vector,
            );
            if !intent.expert_domain.is_empty() {
                doc.metadata
                    .insert("domain".into(), intent.expert_domain.clone());
            }
            state.vectors.upsert(doc).await?;
            seeded += 1;
        }
    }

    tracing::info!(
        documents = seeded,
        intents = catalog.len(),
        "RAG example corpus seeded"
    );
    Ok(seeded)
}
