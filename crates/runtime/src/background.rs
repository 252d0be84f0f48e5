//! Background maintenance loops.
//!
//! Session-expiry sweep, stale-tracker sweep, and catalogue hot reload
//! run as explicit tokio tasks sharing one stop signal; shutdown waits
//! for them up to a grace period.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::state::AppState;

/// Handles to the spawned maintenance loops.
pub struct BackgroundTasks {
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Spawn every maintenance loop for this runtime.
    pub fn spawn(state: Arc<AppState>) -> Self {
        let (stop, _) = watch::channel(false);
        let mut handles = Vec::new();

        handles.push(tokio::spawn(mando_sessions::lifecycle::run_cleanup_loop(
            state.sessions.clone(),
            stop.subscribe(),
        )));

        handles.push(tokio::spawn(mando_orchestrator::run_sweep_loop(
            state.progress.clone(),
            stop.subscribe(),
        )));

        handles.push(tokio::spawn(mando_catalog::reload::run_reload_loop(
            state.intents.clone(),
            state.actions.clone(),
            state.config.catalog.clone(),
            stop.subscribe(),
        )));

        Self { stop, handles }
    }

    /// Signal every loop to stop and wait up to `grace` for each.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.stop.send(true);
        for handle in self.handles {
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!("background loop did not stop within grace period");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Dependencies, Runtime};
    use mando_catalog::{IntentCatalog, ToolActionRegistry};
    use mando_domain::config::{CatalogConfig, Config, LlmProviderConfig};
    use mando_index::InMemoryVectorStore;
    use mando_providers::testing::{MockEmbedder, MockLlm};
    use mando_providers::LlmProvider;
    use mando_sessions::InMemoryKv;
    use std::collections::HashMap;

    #[tokio::test]
    async fn loops_stop_within_grace() {
        let catalog = IntentCatalog::load_str(
            r#"
            [[intent]]
            intent_id = "ayuda"
            description = "Ayuda"
            examples = ["ayuda"]
            "#,
            "v",
            &CatalogConfig::default(),
            None,
        )
        .unwrap()
        .0;

        let llm: Arc<dyn LlmProvider> = Arc::new(MockLlm::new("primary", "{}"));
        let mut llms = HashMap::new();
        llms.insert("primary".to_owned(), llm.clone());

        let config = Config {
            llm: mando_domain::config::LlmConfig {
                providers: vec![LlmProviderConfig {
                    id: "primary".into(),
                    base_url: "http://localhost:8000".into(),
                    model: "m".into(),
                    api_key_env: None,
                    temperature: 0.2,
                    max_tokens: 256,
                    timeout_ms: 1000,
                    max_retries: 0,
                }],
            },
            ..Config::default()
        };

        let runtime = Runtime::new(
            config,
            Dependencies {
                kv: Arc::new(InMemoryKv::new()),
                vectors: Arc::new(InMemoryVectorStore::new(8)),
                embedder: Arc::new(MockEmbedder::new(8)),
                llms,
                primary_llm: llm,
                catalog,
                actions: Arc::new(ToolActionRegistry::new()),
            },
        )
        .unwrap();

        let tasks = BackgroundTasks::spawn(runtime.state().clone());
        tokio::time::timeout(
            Duration::from_secs(2),
            tasks.shutdown(Duration::from_secs(1)),
        )
        .await
        .expect("shutdown should finish within grace");
    }
}
