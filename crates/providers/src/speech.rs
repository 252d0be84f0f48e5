//! Speech service interfaces.
//!
//! Transcription and synthesis are external collaborators; the assistant
//! consumes these contracts and never implements them.

use mando_domain::error::Result;

/// Result of transcribing an audio utterance.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    pub confidence: f64,
    /// BCP-47 tag of the detected language.
    pub language: String,
}

#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8], language: Option<&str>) -> Result<Transcription>;
}

#[async_trait::async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str, speed: f32) -> Result<Vec<u8>>;
}
