//! Tool action registry.
//!
//! Each callable external action declares a typed input schema, a
//! side-effect class, idempotency and rollback capability, and the
//! result keys its output is expected to carry. A small typed dispatch
//! table maps action ids to adapters.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mando_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schema types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Boolean,
}

impl ParamType {
    fn matches(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        }
    }
}

/// One named input parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
        }
    }
}

/// Side-effect class of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    Read,
    Write,
    External,
}

/// A callable external action and its declared schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolAction {
    pub action_id: String,
    /// Endpoint reference (URL for HTTP adapters).
    pub endpoint: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Keys the successful result object must carry (checked by the
    /// progress tracker's completion validation).
    #[serde(default)]
    pub result_keys: Vec<String>,
    pub side_effect: SideEffect,
    /// The orchestrator freely retries idempotent actions; others retry
    /// only on explicitly transient errors.
    #[serde(default)]
    pub idempotent: bool,
    /// Whether the adapter can compensate a completed invocation.
    #[serde(default)]
    pub supports_rollback: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Argument validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One problem found while validating invocation arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgIssue {
    Missing { name: String },
    Unknown { name: String },
    WrongType { name: String, expected: ParamType },
}

impl fmt::Display for ArgIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgIssue::Missing { name } => write!(f, "missing required argument \"{name}\""),
            ArgIssue::Unknown { name } => write!(f, "unknown argument \"{name}\""),
            ArgIssue::WrongType { name, expected } => {
                write!(f, "argument \"{name}\" must be a {}", expected.as_str())
            }
        }
    }
}

impl ToolAction {
    /// Check arguments against the declared schema.
    pub fn validate_args(&self, args: &BTreeMap<String, Value>) -> Vec<ArgIssue> {
        let mut issues = Vec::new();

        for param in &self.params {
            match args.get(&param.name) {
                None if param.required => issues.push(ArgIssue::Missing {
                    name: param.name.clone(),
                }),
                Some(value) if !param.param_type.matches(value) => {
                    issues.push(ArgIssue::WrongType {
                        name: param.name.clone(),
                        expected: param.param_type,
                    })
                }
                _ => {}
            }
        }

        for name in args.keys() {
            if !self.params.iter().any(|p| &p.name == name) {
                issues.push(ArgIssue::Unknown { name: name.clone() });
            }
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Invocation context passed through to adapters.
#[derive(Debug, Clone)]
pub struct InvocationCtx {
    pub session_id: String,
    pub request_id: String,
    /// Per-action timeout enforced by the orchestrator; adapters may use
    /// it for their own HTTP deadline.
    pub timeout: Duration,
}

/// Adapter that performs the external call for one action.
#[async_trait::async_trait]
pub trait ToolAdapter: Send + Sync {
    async fn invoke(&self, args: &BTreeMap<String, Value>, ctx: &InvocationCtx) -> Result<Value>;

    /// Compensate a completed invocation. Only called when the action
    /// declares `supports_rollback`.
    async fn rollback(&self, _args: &BTreeMap<String, Value>, _result: &Value) -> Result<()> {
        Err(Error::Other("rollback not supported by this adapter".into()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Registered {
    action: ToolAction,
    adapter: Arc<dyn ToolAdapter>,
}

/// Dispatch table from action id to `(schema, adapter)`.
#[derive(Default)]
pub struct ToolActionRegistry {
    actions: RwLock<HashMap<String, Arc<Registered>>>,
}

impl ToolActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action. Re-registering an id replaces the previous
    /// entry (last write wins).
    pub fn register(&self, action: ToolAction, adapter: Arc<dyn ToolAdapter>) {
        let id = action.action_id.clone();
        self.actions
            .write()
            .insert(id, Arc::new(Registered { action, adapter }));
    }

    pub fn get(&self, action_id: &str) -> Option<ToolAction> {
        self.actions.read().get(action_id).map(|r| r.action.clone())
    }

    pub fn action_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.actions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Validate arguments for an action without invoking it.
    pub fn validate(&self, action_id: &str, args: &BTreeMap<String, Value>) -> Result<()> {
        let registered = self
            .actions
            .read()
            .get(action_id)
            .cloned()
            .ok_or_else(|| Error::ActionNotFound(action_id.to_owned()))?;

        let issues = registered.action.validate_args(args);
        if issues.is_empty() {
            Ok(())
        } else {
            let joined = issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            Err(Error::Validation(format!("{action_id}: {joined}")))
        }
    }

    /// Validate then invoke an action through its adapter.
    pub async fn invoke(
        &self,
        action_id: &str,
        args: &BTreeMap<String, Value>,
        ctx: &InvocationCtx,
    ) -> Result<Value> {
        let registered = self
            .actions
            .read()
            .get(action_id)
            .cloned()
            .ok_or_else(|| Error::ActionNotFound(action_id.to_owned()))?;

        let issues = registered.action.validate_args(args);
        if !issues.is_empty() {
            let joined = issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::Validation(format!("{action_id}: {joined}")));
        }

        registered.adapter.invoke(args, ctx).await
    }

    /// Roll back a completed invocation.
    pub async fn rollback(
        &self,
        action_id: &str,
        args: &BTreeMap<String, Value>,
        result: &Value,
    ) -> Result<()> {
        let registered = self
            .actions
            .read()
            .get(action_id)
            .cloned()
            .ok_or_else(|| Error::ActionNotFound(action_id.to_owned()))?;

        if !registered.action.supports_rollback {
            return Err(Error::Other(format!(
                "action {action_id} does not support rollback"
            )));
        }
        registered.adapter.rollback(args, result).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Generic HTTP adapter: POSTs the arguments as a JSON body mirroring
/// the declared schema.
///
/// Status mapping: 2xx ⇒ success with JSON result; 401/403 ⇒ auth error
/// (permanent, critical); other 4xx ⇒ permanent failure; 5xx/timeout ⇒
/// transient failure eligible for retry.
pub struct HttpToolAdapter {
    http: reqwest::Client,
    endpoint: String,
    rollback_endpoint: Option<String>,
}

impl HttpToolAdapter {
    pub fn new(endpoint: impl Into<String>, rollback_endpoint: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            rollback_endpoint,
        })
    }

    async fn post(&self, url: &str, body: &Value, timeout: Duration) -> Result<Value> {
        let resp = self
            .http
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("tool call {url}"))
                } else if e.is_connect() {
                    Error::Http(format!("connection failed: {e}"))
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json()
                .await
                .map_err(|e| Error::Http(format!("tool response not JSON: {e}")));
        }

        let body_text = resp.text().await.unwrap_or_default();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::Auth(format!("tool returned {status}: {body_text}")));
        }
        Err(Error::Provider {
            provider: "tools".into(),
            message: format!("HTTP {}: {body_text}", status.as_u16()),
        })
    }
}

#[async_trait::async_trait]
impl ToolAdapter for HttpToolAdapter {
    async fn invoke(&self, args: &BTreeMap<String, Value>, ctx: &InvocationCtx) -> Result<Value> {
        let body = serde_json::to_value(args)?;
        self.post(&self.endpoint, &body, ctx.timeout).await
    }

    async fn rollback(&self, args: &BTreeMap<String, Value>, result: &Value) -> Result<()> {
        let url = self
            .rollback_endpoint
            .as_deref()
            .ok_or_else(|| Error::Other("no rollback endpoint configured".into()))?;
        let body = serde_json::json!({ "args": args, "result": result });
        self.post(url, &body, Duration::from_secs(30)).await?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn weather_action() -> ToolAction {
        ToolAction {
            action_id: "consultar_tiempo".into(),
            endpoint: "http://tools/weather".into(),
            params: vec![
                ParamSpec::required("ubicacion", ParamType::String),
                ParamSpec::optional("dias", ParamType::Number),
            ],
            result_keys: vec!["location".into(), "temperature".into(), "condition".into()],
            side_effect: SideEffect::Read,
            idempotent: true,
            supports_rollback: false,
        }
    }

    fn args(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    struct EchoAdapter;

    #[async_trait::async_trait]
    impl ToolAdapter for EchoAdapter {
        async fn invoke(
            &self,
            args: &BTreeMap<String, Value>,
            _ctx: &InvocationCtx,
        ) -> Result<Value> {
            Ok(serde_json::to_value(args)?)
        }
    }

    fn ctx() -> InvocationCtx {
        InvocationCtx {
            session_id: "s".into(),
            request_id: "r".into(),
            timeout: Duration::from_secs(5),
        }
    }

    // ── validate_args ───────────────────────────────────────────────

    #[test]
    fn valid_args_pass() {
        let action = weather_action();
        let issues = action.validate_args(&args(&[("ubicacion", "Madrid".into())]));
        assert!(issues.is_empty());
    }

    #[test]
    fn missing_required_is_reported() {
        let action = weather_action();
        let issues = action.validate_args(&args(&[]));
        assert_eq!(
            issues,
            vec![ArgIssue::Missing {
                name: "ubicacion".into()
            }]
        );
    }

    #[test]
    fn missing_optional_is_fine() {
        let action = weather_action();
        let issues = action.validate_args(&args(&[("ubicacion", "Madrid".into())]));
        assert!(issues.is_empty());
    }

    #[test]
    fn unknown_arg_is_reported() {
        let action = weather_action();
        let issues = action.validate_args(&args(&[
            ("ubicacion", "Madrid".into()),
            ("color", "azul".into()),
        ]));
        assert_eq!(
            issues,
            vec![ArgIssue::Unknown {
                name: "color".into()
            }]
        );
    }

    #[test]
    fn wrong_type_is_reported() {
        let action = weather_action();
        let issues = action.validate_args(&args(&[
            ("ubicacion", Value::from(42)),
        ]));
        assert_eq!(
            issues,
            vec![ArgIssue::WrongType {
                name: "ubicacion".into(),
                expected: ParamType::String,
            }]
        );
    }

    #[test]
    fn multiple_issues_accumulate() {
        let action = weather_action();
        let issues = action.validate_args(&args(&[
            ("dias", Value::from("tres")),
            ("color", "azul".into()),
        ]));
        assert_eq!(issues.len(), 3); // missing ubicacion, wrong dias, unknown color
    }

    // ── registry ────────────────────────────────────────────────────

    #[tokio::test]
    async fn invoke_dispatches_to_adapter() {
        let registry = ToolActionRegistry::new();
        registry.register(weather_action(), Arc::new(EchoAdapter));

        let result = registry
            .invoke(
                "consultar_tiempo",
                &args(&[("ubicacion", "Madrid".into())]),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(result["ubicacion"], "Madrid");
    }

    #[tokio::test]
    async fn invoke_unknown_action_errors() {
        let registry = ToolActionRegistry::new();
        let err = registry.invoke("ghost", &args(&[]), &ctx()).await.unwrap_err();
        assert!(matches!(err, Error::ActionNotFound(_)));
    }

    #[tokio::test]
    async fn invoke_rejects_invalid_args_without_calling() {
        let registry = ToolActionRegistry::new();
        registry.register(weather_action(), Arc::new(EchoAdapter));

        let err = registry
            .invoke("consultar_tiempo", &args(&[]), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn rollback_requires_capability() {
        let registry = ToolActionRegistry::new();
        registry.register(weather_action(), Arc::new(EchoAdapter));

        let err = registry
            .rollback("consultar_tiempo", &args(&[]), &Value::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not support rollback"));
    }

    #[test]
    fn action_ids_sorted() {
        let registry = ToolActionRegistry::new();
        registry.register(weather_action(), Arc::new(EchoAdapter));
        let mut second = weather_action();
        second.action_id = "apagar_luz".into();
        registry.register(second, Arc::new(EchoAdapter));

        assert_eq!(registry.action_ids(), vec!["apagar_luz", "consultar_tiempo"]);
    }
}
