//! Retrieval-augmented intent classification with graduated fallback.
//!
//! The classifier embeds the utterance, retrieves labeled examples from
//! the vector index, asks the LLM for a structured decision, and scores
//! the result with a ten-signal weighted confidence. Weak results
//! degrade through up to five fallback strategies.

pub mod confidence;
pub mod fallback;
pub mod prompt;
pub mod retrieval;

pub use retrieval::RetrievalClassifier;
