//! End-to-end pipeline tests with mock providers, the in-memory KV
//! store, and the in-memory vector index.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use mando_catalog::{
    InvocationCtx, IntentCatalog, ParamSpec, ParamType, SideEffect, ToolAction,
    ToolActionRegistry, ToolAdapter,
};
use mando_domain::cancel::CancelToken;
use mando_domain::config::{CatalogConfig, Config, LlmConfig, LlmProviderConfig};
use mando_domain::error::{Error, Result};
use mando_domain::intent::FallbackLevel;
use mando_domain::subtask::SubtaskStatus;
use mando_index::InMemoryVectorStore;
use mando_providers::testing::{MockEmbedder, MockLlm};
use mando_providers::LlmProvider;
use mando_runtime::{bootstrap, AssistantReply, Dependencies, Runtime, UtteranceRequest};
use mando_sessions::InMemoryKv;

const DIM: usize = 4;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scaffolding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct ToolLog {
    scripted: Mutex<HashMap<String, VecDeque<Result<serde_json::Value>>>>,
    invocations: Mutex<Vec<String>>,
    rollbacks: Mutex<Vec<String>>,
}

impl ToolLog {
    fn script(&self, action_id: &str, result: Result<serde_json::Value>) {
        self.scripted
            .lock()
            .entry(action_id.to_owned())
            .or_default()
            .push_back(result);
    }
}

struct LoggingAdapter {
    action_id: String,
    log: Arc<ToolLog>,
}

#[async_trait::async_trait]
impl ToolAdapter for LoggingAdapter {
    async fn invoke(
        &self,
        _args: &BTreeMap<String, serde_json::Value>,
        _ctx: &InvocationCtx,
    ) -> Result<serde_json::Value> {
        self.log.invocations.lock().push(self.action_id.clone());
        match self
            .log
            .scripted
            .lock()
            .get_mut(&self.action_id)
            .and_then(|queue| queue.pop_front())
        {
            Some(result) => result,
            None => Ok(serde_json::json!({"ok": true})),
        }
    }

    async fn rollback(
        &self,
        _args: &BTreeMap<String, serde_json::Value>,
        _result: &serde_json::Value,
    ) -> Result<()> {
        self.log.rollbacks.lock().push(self.action_id.clone());
        Ok(())
    }
}

const CATALOG: &str = r#"
    [[intent]]
    intent_id = "encender_luz"
    description = "Encender una luz"
    expert_domain = "smart_home"
    examples = ["enciende la luz", "prende la luz del salón"]
    required_slots = ["lugar"]
    tool_action_id = "encender_luz"

    [[intent]]
    intent_id = "consultar_tiempo"
    description = "Consultar el tiempo"
    expert_domain = "informacion"
    examples = ["qué tiempo hace", "qué tiempo hace hoy"]
    required_slots = ["ubicacion"]
    tool_action_id = "consultar_tiempo"
    confidence_threshold = 0.6

    [[intent]]
    intent_id = "programar_alarma"
    description = "Programar una alarma"
    expert_domain = "utilidades"
    examples = ["ponme una alarma"]
    required_slots = ["hora"]
    tool_action_id = "programar_alarma"
    confidence_threshold = 0.6

    [intent.slot_prompts]
    hora = "¿A qué hora?"

    [[intent]]
    intent_id = "reproducir_musica"
    description = "Reproducir música"
    expert_domain = "media"
    examples = ["pon música"]
    tool_action_id = "reproducir_musica"
    confidence_threshold = 0.5

    [[intent]]
    intent_id = "crear_github_issue"
    description = "Crear una incidencia"
    expert_domain = "trabajo"
    examples = ["crea una incidencia"]
    tool_action_id = "crear_github_issue"
    confidence_threshold = 0.5

    [[intent]]
    intent_id = "ayuda"
    description = "Pedir ayuda"
    expert_domain = "general"
    examples = ["ayuda"]
"#;

struct Fixture {
    runtime: Runtime,
    llm: Arc<MockLlm>,
    embedder: Arc<MockEmbedder>,
    tools: Arc<ToolLog>,
}

impl Fixture {
    async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    async fn with_config(mut config: Config) -> Self {
        config.llm = LlmConfig {
            providers: vec![LlmProviderConfig {
                id: "primary".into(),
                base_url: "http://localhost:8000".into(),
                model: "test".into(),
                api_key_env: None,
                temperature: 0.1,
                max_tokens: 512,
                timeout_ms: 2_000,
                max_retries: 0,
            }],
        };
        config.embedding.dimension = DIM;
        config.task_orchestrator.retry_delay_ms = 1;

        let llm = Arc::new(MockLlm::new("primary", "{}"));
        let embedder = Arc::new(MockEmbedder::new(DIM));
        let tools = Arc::new(ToolLog::default());

        // Example embeddings: one direction per intent family.
        embedder.set("enciende la luz", vec![1.0, 0.0, 0.0, 0.0]);
        embedder.set("prende la luz del salón", vec![0.98, 0.08, 0.0, 0.0]);
        embedder.set("qué tiempo hace", vec![0.0, 1.0, 0.0, 0.0]);
        embedder.set("qué tiempo hace hoy", vec![0.0, 0.97, 0.1, 0.0]);
        embedder.set("ponme una alarma", vec![0.0, 0.0, 1.0, 0.0]);
        embedder.set("pon música", vec![0.0, 0.0, 0.0, 1.0]);
        embedder.set("crea una incidencia", vec![0.5, 0.5, 0.5, 0.5]);
        embedder.set("ayuda", vec![0.25, 0.25, 0.25, 0.9]);
        // Far from every example: retrieval for gibberish comes up empty.
        embedder.set("xyzzy", vec![-1.0, -1.0, -1.0, -1.0]);

        let actions = Arc::new(ToolActionRegistry::new());
        let register = |action: ToolAction| {
            actions.register(
                action.clone(),
                Arc::new(LoggingAdapter {
                    action_id: action.action_id.clone(),
                    log: tools.clone(),
                }),
            );
        };
        register(ToolAction {
            action_id: "encender_luz".into(),
            endpoint: "http://tools/light-on".into(),
            params: vec![ParamSpec::required("lugar", ParamType::String)],
            result_keys: Vec::new(),
            side_effect: SideEffect::Write,
            idempotent: true,
            supports_rollback: false,
        });
        register(ToolAction {
            action_id: "consultar_tiempo".into(),
            endpoint: "http://tools/weather".into(),
            params: vec![ParamSpec::required("ubicacion", ParamType::String)],
            result_keys: vec!["location".into(), "temperature".into(), "condition".into()],
            side_effect: SideEffect::Read,
            idempotent: true,
            supports_rollback: false,
        });
        register(ToolAction {
            action_id: "programar_alarma".into(),
            endpoint: "http://tools/alarm".into(),
            params: vec![ParamSpec::required("hora", ParamType::String)],
            result_keys: vec!["alarm_id".into(), "scheduled_time".into()],
            side_effect: SideEffect::Write,
            idempotent: false,
            supports_rollback: true,
        });
        register(ToolAction {
            action_id: "programar_alarma_condicional".into(),
            endpoint: "http://tools/conditional-alarm".into(),
            params: vec![
                ParamSpec::required("hora", ParamType::String),
                ParamSpec::required("condicion", ParamType::String),
            ],
            result_keys: vec!["alarm_id".into(), "scheduled_time".into()],
            side_effect: SideEffect::Write,
            idempotent: false,
            supports_rollback: true,
        });
        register(ToolAction {
            action_id: "reproducir_musica".into(),
            endpoint: "http://tools/music".into(),
            params: vec![
                ParamSpec::optional("genero", ParamType::String),
                ParamSpec::optional("artista", ParamType::String),
            ],
            side_effect: SideEffect::External,
            result_keys: Vec::new(),
            idempotent: true,
            supports_rollback: false,
        });
        register(ToolAction {
            action_id: "crear_github_issue".into(),
            endpoint: "http://tools/issues".into(),
            params: vec![ParamSpec::optional("titulo", ParamType::String)],
            result_keys: vec!["issue_id".into()],
            side_effect: SideEffect::External,
            idempotent: false,
            supports_rollback: true,
        });
        register(ToolAction {
            action_id: "asignar_issue".into(),
            endpoint: "http://tools/issues/assign".into(),
            params: vec![ParamSpec::optional("persona", ParamType::String)],
            result_keys: Vec::new(),
            side_effect: SideEffect::External,
            idempotent: false,
            supports_rollback: false,
        });

        let catalog =
            IntentCatalog::load_str(CATALOG, "v1", &CatalogConfig::default(), Some(&actions))
                .unwrap()
                .0;

        let llm_provider: Arc<dyn LlmProvider> = llm.clone();
        let mut llms = HashMap::new();
        llms.insert("primary".to_owned(), llm_provider.clone());

        let runtime = Runtime::new(
            config,
            Dependencies {
                kv: Arc::new(InMemoryKv::new()),
                vectors: Arc::new(InMemoryVectorStore::new(DIM)),
                embedder: embedder.clone(),
                llms,
                primary_llm: llm_provider,
                catalog,
                actions,
            },
        )
        .unwrap();

        bootstrap::seed_examples(runtime.state()).await.unwrap();

        Self {
            runtime,
            llm,
            embedder,
            tools,
        }
    }

    async fn say(&self, session_id: Option<&str>, text: &str) -> mando_runtime::TurnOutcome {
        self.say_with_metadata(session_id, text, HashMap::new()).await
    }

    async fn say_with_metadata(
        &self,
        session_id: Option<&str>,
        text: &str,
        metadata: HashMap<String, String>,
    ) -> mando_runtime::TurnOutcome {
        self.runtime
            .handle_utterance(
                UtteranceRequest {
                    session_id: session_id.map(str::to_owned),
                    user_id: "user-1".into(),
                    text: text.into(),
                    metadata,
                },
                &CancelToken::new(),
            )
            .await
            .unwrap()
    }
}

fn classification_json(intent: &str, confidence: f64, entities: serde_json::Value) -> String {
    serde_json::json!({
        "intent": intent,
        "confidence": confidence,
        "entities": entities,
        "reasoning": "test"
    })
    .to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 1: simple smart-home, one action
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn simple_smart_home_command_executes_one_subtask() {
    let fixture = Fixture::new().await;
    fixture
        .embedder
        .set("enciende la luz del salón", vec![0.99, 0.05, 0.0, 0.0]);
    fixture.llm.push_response(classification_json(
        "encender_luz",
        0.96,
        serde_json::json!({"lugar": "salón"}),
    ));

    let outcome = fixture.say(None, "enciende la luz del salón").await;

    let classification = outcome.classification.as_ref().unwrap();
    assert_eq!(classification.intent_id, "encender_luz");
    assert!(
        classification.confidence >= 0.85,
        "confidence {}",
        classification.confidence
    );
    assert_eq!(classification.fallback_level, FallbackLevel::None);

    let execution = outcome.execution.as_ref().unwrap();
    assert!(execution.all_successful);
    assert_eq!(execution.total_tasks, 1);
    assert_eq!(execution.subtasks[0].action_id, "encender_luz");
    assert_eq!(execution.subtasks[0].entities["lugar"], "salón");
    assert_eq!(execution.subtasks[0].status, SubtaskStatus::Completed);
    assert!(execution.subtasks[0].dependencies.is_empty());

    let tracker = fixture
        .runtime
        .state()
        .progress
        .get(&execution.tracker_id)
        .unwrap();
    assert!((tracker.overall_pct() - 100.0).abs() < 1e-9);
    assert_eq!(outcome.reply, AssistantReply::Answer { text: "Hecho.".into() });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 2: multi-action with ordering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn multi_action_request_orders_conditional_alarm_after_weather() {
    let fixture = Fixture::new().await;
    let utterance = "consulta el tiempo en Madrid y si llueve programa una alarma a las 07:00";
    fixture.embedder.set(utterance, vec![0.05, 0.99, 0.0, 0.0]);
    fixture.llm.push_response(classification_json(
        "consultar_tiempo",
        0.9,
        serde_json::json!({"ubicacion": "Madrid"}),
    ));
    fixture.tools.script(
        "consultar_tiempo",
        Ok(serde_json::json!({
            "location": "Madrid", "temperature": 14, "condition": "lluvia"
        })),
    );
    fixture.tools.script(
        "programar_alarma_condicional",
        Ok(serde_json::json!({"alarm_id": "al-1", "scheduled_time": "07:00"})),
    );

    let outcome = fixture.say(None, utterance).await;

    let execution = outcome.execution.as_ref().unwrap();
    assert!(execution.all_successful, "{:?}", execution.subtasks);
    assert_eq!(execution.total_tasks, 2);
    assert_eq!(execution.completed_tasks, 2);

    let weather = execution
        .subtasks
        .iter()
        .find(|s| s.action_id == "consultar_tiempo")
        .unwrap();
    assert_eq!(weather.entities["ubicacion"], "Madrid");
    assert!(weather.dependencies.is_empty());

    let alarm = execution
        .subtasks
        .iter()
        .find(|s| s.action_id == "programar_alarma_condicional")
        .unwrap();
    assert_eq!(alarm.entities["hora"], "07:00");
    assert_eq!(alarm.entities["condicion"], "si_llueve");
    assert!(alarm.dependencies.contains(&weather.subtask_id));

    // Level happens-before: the weather call reached the tools first.
    assert_eq!(
        *fixture.tools.invocations.lock(),
        vec![
            "consultar_tiempo".to_string(),
            "programar_alarma_condicional".to_string()
        ]
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 3: MoE majority vote
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn moe_majority_vote_classifies_request() {
    let mut config = Config::default();
    config.moe.enabled = true;
    config.moe.max_debate_rounds = 1;
    config.moe.consensus_threshold = 0.5;
    config.moe.participants = vec![
        mando_domain::config::ParticipantConfig {
            llm_id: "primary".into(),
            role: mando_domain::config::ExpertRole::Literalist,
            weight: 1.0,
        },
        mando_domain::config::ParticipantConfig {
            llm_id: "primary".into(),
            role: mando_domain::config::ExpertRole::Contextualist,
            weight: 0.8,
        },
        mando_domain::config::ParticipantConfig {
            llm_id: "primary".into(),
            role: mando_domain::config::ExpertRole::ActionPlanner,
            weight: 0.9,
        },
    ];
    // Sequential voting keeps the scripted responses aligned with the
    // participants.
    config.moe.parallel_voting = false;

    let fixture = Fixture::with_config(config).await;
    fixture
        .llm
        .push_response(classification_json("reproducir_musica", 0.9, serde_json::json!({})));
    fixture
        .llm
        .push_response(classification_json("reproducir_musica", 0.8, serde_json::json!({})));
    fixture
        .llm
        .push_response(classification_json("programar_alarma", 0.95, serde_json::json!({})));

    let outcome = fixture.say(None, "pon algo").await;

    let classification = outcome.classification.as_ref().unwrap();
    assert_eq!(classification.intent_id, "reproducir_musica");
    let expected = (0.9 * 1.0 + 0.8 * 0.8) / 1.8;
    assert!((classification.confidence - expected).abs() < 1e-9);
    assert!(classification.reasoning.contains("majority"));

    // The winning intent has no required slots, so it executes.
    let execution = outcome.execution.as_ref().unwrap();
    assert!(execution.all_successful);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 4: graduated fallback to context analysis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn weak_classification_degrades_to_context_analysis() {
    let fixture = Fixture::new().await;
    // Primary and level-1 reclassification both come back weak.
    fixture.llm.push_response(classification_json(
        "consultar_tiempo",
        0.1,
        serde_json::json!({}),
    ));
    fixture.llm.push_response(classification_json(
        "consultar_tiempo",
        0.1,
        serde_json::json!({}),
    ));

    let mut metadata = HashMap::new();
    metadata.insert("device_type".to_owned(), "speaker".to_owned());
    metadata.insert("hour_of_day".to_owned(), "15".to_owned());

    let outcome = fixture.say_with_metadata(None, "xyzzy", metadata).await;

    let classification = outcome.classification.as_ref().unwrap();
    assert_eq!(classification.intent_id, "reproducir_musica");
    assert_eq!(classification.fallback_level, FallbackLevel::ContextAnalysis);
    assert_eq!(classification.fallback_level.as_u8(), 4);
    assert!((classification.confidence - 0.35).abs() < 1e-9);
}

#[tokio::test]
async fn hopeless_utterance_lands_on_help_clarification() {
    let fixture = Fixture::new().await;
    fixture.llm.push_response("no entiendo nada".to_owned());
    fixture.llm.push_response("sigo sin entender".to_owned());

    let mut metadata = HashMap::new();
    metadata.insert("hour_of_day".to_owned(), "15".to_owned());

    let outcome = fixture.say_with_metadata(None, "xyzzy", metadata).await;

    let classification = outcome.classification.as_ref().unwrap();
    assert_eq!(classification.intent_id, "ayuda");
    assert_eq!(classification.fallback_level, FallbackLevel::Generic);
    assert!(matches!(outcome.reply, AssistantReply::Clarification { .. }));
    assert!(outcome.execution.is_none());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 5: slot filling across turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn slot_filling_completes_over_two_turns() {
    let fixture = Fixture::new().await;
    fixture.llm.push_response(classification_json(
        "programar_alarma",
        0.9,
        serde_json::json!({}),
    ));
    fixture.tools.script(
        "programar_alarma",
        Ok(serde_json::json!({"alarm_id": "al-7", "scheduled_time": "07:30"})),
    );

    // Turn 1: the time is missing; the assistant asks for it.
    let turn1 = fixture.say(None, "ponme una alarma").await;
    assert_eq!(
        turn1.reply,
        AssistantReply::FollowUp {
            slot: "hora".into(),
            question: "¿A qué hora?".into()
        }
    );
    assert!(turn1.execution.is_none());

    // Turn 2: the answer fills the slot and the subtask dispatches.
    let turn2 = fixture
        .say(Some(&turn1.session_id), "a las siete y media")
        .await;

    assert_eq!(turn2.turn_id, 2);
    let execution = turn2.execution.as_ref().unwrap();
    assert!(execution.all_successful);
    assert_eq!(execution.total_tasks, 1);
    assert_eq!(execution.subtasks[0].action_id, "programar_alarma");
    assert_eq!(execution.subtasks[0].entities["hora"], "07:30");
    assert_eq!(turn2.reply, AssistantReply::Answer { text: "Hecho.".into() });
}

#[tokio::test]
async fn slot_filling_abandons_after_max_attempts() {
    let fixture = Fixture::new().await;
    fixture.llm.push_response(classification_json(
        "programar_alarma",
        0.9,
        serde_json::json!({}),
    ));

    let turn1 = fixture.say(None, "ponme una alarma").await;
    let session_id = turn1.session_id.clone();
    assert!(matches!(turn1.reply, AssistantReply::FollowUp { .. }));

    // Two more unhelpful answers exhaust the three attempts...
    let turn2 = fixture.say(Some(&session_id), "pues no sé").await;
    assert!(matches!(turn2.reply, AssistantReply::FollowUp { .. }));
    let turn3 = fixture.say(Some(&session_id), "ni idea").await;
    assert!(matches!(turn3.reply, AssistantReply::FollowUp { .. }));

    // ...and the fourth abandons with an apology.
    let turn4 = fixture.say(Some(&session_id), "que no lo sé").await;
    match &turn4.reply {
        AssistantReply::Abandoned { slot, text } => {
            assert_eq!(slot, "hora");
            assert!(text.contains("Lo siento"));
        }
        other => panic!("expected abandonment, got {other:?}"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 6: critical failure with rollback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn auth_failure_rolls_back_created_issue() {
    let fixture = Fixture::new().await;
    let utterance = "crea una incidencia y asigna la incidencia a María";
    fixture.embedder.set(utterance, vec![0.45, 0.5, 0.5, 0.5]);
    fixture.llm.push_response(classification_json(
        "crear_github_issue",
        0.9,
        serde_json::json!({}),
    ));
    fixture
        .tools
        .script("crear_github_issue", Ok(serde_json::json!({"issue_id": 42})));
    fixture.tools.script(
        "asignar_issue",
        Err(Error::Auth("tool returned 401 Unauthorized".into())),
    );

    let outcome = fixture.say(None, utterance).await;

    let execution = outcome.execution.as_ref().unwrap();
    assert!(!execution.all_successful);
    assert_eq!(execution.failed_tasks, 1);

    let create = execution
        .subtasks
        .iter()
        .find(|s| s.action_id == "crear_github_issue")
        .unwrap();
    assert_eq!(create.status, SubtaskStatus::Cancelled);
    assert_eq!(execution.rolled_back, vec![create.subtask_id.clone()]);

    let assign = execution
        .subtasks
        .iter()
        .find(|s| s.action_id == "asignar_issue")
        .unwrap();
    assert_eq!(assign.status, SubtaskStatus::Failed);

    assert_eq!(*fixture.tools.rollbacks.lock(), vec!["crear_github_issue".to_string()]);
    assert!(outcome.reply.text().contains("revertido"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session properties
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn turn_ids_increase_and_context_survives_turns() {
    let fixture = Fixture::new().await;
    fixture
        .embedder
        .set("enciende la luz del salón", vec![0.99, 0.05, 0.0, 0.0]);
    fixture.llm.push_response(classification_json(
        "encender_luz",
        0.96,
        serde_json::json!({"lugar": "salón"}),
    ));

    let turn1 = fixture.say(None, "enciende la luz del salón").await;
    assert_eq!(turn1.turn_id, 1);

    fixture.llm.push_response(classification_json(
        "programar_alarma",
        0.9,
        serde_json::json!({}),
    ));
    let turn2 = fixture.say(Some(&turn1.session_id), "ponme una alarma").await;
    assert_eq!(turn2.turn_id, 2);
    assert_eq!(turn2.session_id, turn1.session_id);

    let session = fixture
        .runtime
        .state()
        .sessions
        .load(&turn1.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.total_turns, 2);
    // The light's location landed in the entity cache.
    assert_eq!(session.context.entity_cache["location"].value, "salón");
    assert_eq!(session.context.active_intent.as_deref(), Some("programar_alarma"));
}

#[tokio::test]
async fn compaction_folds_old_turns_and_levels_are_monotone() {
    let mut config = Config::default();
    config.sessions.compaction_window_turns = 2;
    let fixture = Fixture::with_config(config).await;
    fixture
        .embedder
        .set("ponme una alarma a las 07:00", vec![0.0, 0.0, 1.0, 0.0]);

    let mut session_id: Option<String> = None;
    let mut last_level = 0;
    for n in 0..5 {
        fixture.llm.push_response(classification_json(
            "programar_alarma",
            0.9,
            serde_json::json!({}),
        ));
        fixture.tools.script(
            "programar_alarma",
            Ok(serde_json::json!({"alarm_id": n, "scheduled_time": "07:00"})),
        );

        let outcome = fixture
            .say(session_id.as_deref(), "ponme una alarma a las 07:00")
            .await;
        assert!(outcome.execution.is_some(), "turn {n} should execute");
        session_id = Some(outcome.session_id.clone());

        let session = fixture
            .runtime
            .state()
            .sessions
            .load(&outcome.session_id)
            .await
            .unwrap()
            .unwrap();
        assert!(session.context.compression_level >= last_level);
        last_level = session.context.compression_level;
        assert!(session.turns.len() <= 2);
    }
    assert!(last_level > 0);
}
