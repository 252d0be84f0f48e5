//! Shared application state.
//!
//! One explicit context object bundles configuration, stores,
//! registries, and providers; it is threaded through the request
//! pipeline instead of living in globals.

use std::collections::HashMap;
use std::sync::Arc;

use mando_catalog::{IntentCatalog, IntentRegistry, ToolActionRegistry};
use mando_classifier::RetrievalClassifier;
use mando_dialog::{EntityRecognizer, EntityValidator, SlotMachine};
use mando_domain::config::Config;
use mando_domain::error::{Error, Result};
use mando_index::{InMemoryVectorStore, VectorStore};
use mando_moe::experts::Expert;
use mando_moe::VotingEngine;
use mando_orchestrator::{
    DependencyResolver, ProgressStore, SubtaskDecomposer, TaskOrchestrator,
};
use mando_providers::{
    EmbeddingProvider, HttpEmbeddingProvider, HttpLlmProvider, LlmProvider,
};
use mando_sessions::{InMemoryKv, KvStore, SessionStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dependencies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// External collaborators injected at construction. Tests pass mocks;
/// `Runtime::from_config` wires the HTTP implementations.
pub struct Dependencies {
    pub kv: Arc<dyn KvStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    /// Providers keyed by id; the id referenced first in config (or the
    /// sole entry) acts as primary.
    pub llms: HashMap<String, Arc<dyn LlmProvider>>,
    pub primary_llm: Arc<dyn LlmProvider>,
    pub catalog: IntentCatalog,
    pub actions: Arc<ToolActionRegistry>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AppState
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AppState {
    pub config: Config,
    pub sessions: Arc<SessionStore>,
    pub intents: Arc<IntentRegistry>,
    pub actions: Arc<ToolActionRegistry>,
    pub vectors: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub primary_llm: Arc<dyn LlmProvider>,
    pub classifier: RetrievalClassifier,
    pub voting: VotingEngine,
    pub recognizer: EntityRecognizer,
    pub validator: EntityValidator,
    pub slot_machine: SlotMachine,
    pub decomposer: SubtaskDecomposer,
    pub resolver: DependencyResolver,
    pub orchestrator: TaskOrchestrator,
    pub progress: Arc<ProgressStore>,
}

/// The assembled runtime.
pub struct Runtime {
    state: Arc<AppState>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime").finish_non_exhaustive()
    }
}

impl Runtime {
    /// Assemble the runtime from explicit dependencies.
    pub fn new(config: Config, deps: Dependencies) -> Result<Self> {
        let issues = config.validate();
        for issue in &issues {
            tracing::warn!(issue = %issue, "configuration");
        }
        if issues
            .iter()
            .any(|i| i.severity == mando_domain::config::ConfigSeverity::Error)
        {
            return Err(Error::Config(format!(
                "{} configuration error(s); see log",
                issues.len()
            )));
        }

        let sessions = Arc::new(SessionStore::new(deps.kv, config.sessions.clone()));
        let intents = Arc::new(IntentRegistry::new(deps.catalog));

        let classifier = RetrievalClassifier::new(
            deps.primary_llm.clone(),
            deps.embedder.clone(),
            deps.vectors.clone(),
            config.rag.clone(),
        );

        let experts = config
            .moe
            .participants
            .iter()
            .filter_map(|participant| {
                deps.llms.get(&participant.llm_id).map(|llm| Expert {
                    cfg: participant.clone(),
                    llm: llm.clone(),
                })
            })
            .collect();
        let voting = VotingEngine::new(config.moe.clone(), experts, deps.primary_llm.clone());

        let recognizer = EntityRecognizer::new(
            Some(deps.primary_llm.clone()),
            config.entities.clone(),
        );
        let validator = EntityValidator::new(
            Some(deps.primary_llm.clone()),
            config.entities.clone(),
        );
        let slot_machine = SlotMachine::new(
            Some(deps.primary_llm.clone()),
            config.slot_filling.clone(),
        );

        let decomposer = SubtaskDecomposer::new(
            Some(deps.primary_llm.clone()),
            config.task_orchestrator.clone(),
        );
        let resolver = DependencyResolver::default();
        let progress = Arc::new(ProgressStore::new(config.progress_tracker.clone()));
        let orchestrator = TaskOrchestrator::new(
            deps.actions.clone(),
            progress.clone(),
            config.task_orchestrator.clone(),
        );

        Ok(Self {
            state: Arc::new(AppState {
                config,
                sessions,
                intents,
                actions: deps.actions,
                vectors: deps.vectors,
                embedder: deps.embedder,
                primary_llm: deps.primary_llm,
                classifier,
                voting,
                recognizer,
                validator,
                slot_machine,
                decomposer,
                resolver,
                orchestrator,
                progress,
            }),
        })
    }

    /// Wire the HTTP providers and in-process stores from configuration
    /// and load the intent catalogue from disk.
    pub fn from_config(config: Config, actions: Arc<ToolActionRegistry>) -> Result<Self> {
        let mut llms: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        for provider_cfg in &config.llm.providers {
            llms.insert(
                provider_cfg.id.clone(),
                Arc::new(HttpLlmProvider::new(provider_cfg.clone())?),
            );
        }
        let primary_llm = config
            .llm
            .primary()
            .and_then(|p| llms.get(&p.id).cloned())
            .ok_or_else(|| Error::Config("no LLM providers configured".into()))?;

        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::new(HttpEmbeddingProvider::new(config.embedding.clone())?);
        let vectors: Arc<dyn VectorStore> =
            Arc::new(InMemoryVectorStore::new(config.embedding.dimension));
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());

        let catalog = mando_catalog::reload::load_catalog_file(
            std::path::Path::new(&config.catalog.path),
            &config.catalog,
            Some(&actions),
        )?;

        Self::new(
            config,
            Dependencies {
                kv,
                vectors,
                embedder,
                llms,
                primary_llm,
                catalog,
                actions,
            },
        )
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
