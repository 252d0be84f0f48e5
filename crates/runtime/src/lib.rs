//! Request runtime: wires every component into the per-utterance
//! pipeline, seeds the RAG corpus at startup, and runs the background
//! maintenance loops.

pub mod background;
pub mod bootstrap;
pub mod pipeline;
pub mod state;

pub use background::BackgroundTasks;
pub use pipeline::{AssistantReply, TurnOutcome, UtteranceRequest};
pub use state::{AppState, Dependencies, Runtime};

/// Initialize structured logging from `RUST_LOG` (JSON when `json` is
/// set). Safe to call once at process start.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
