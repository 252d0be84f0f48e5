//! Intent catalogue: declarative load, validation, atomic swap.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;

use mando_domain::config::{CatalogConfig, ConfigError, ConfigSeverity};
use mando_domain::error::{Error, Result};
use mando_domain::intent::IntentDefinition;

use crate::actions::ToolActionRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalogue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    intent: Vec<IntentDefinition>,
}

/// An immutable, validated snapshot of the intent catalogue.
///
/// Readers hold an `Arc` snapshot for the duration of one request; hot
/// reload swaps the registry's current snapshot atomically.
#[derive(Debug, Clone)]
pub struct IntentCatalog {
    /// Source checksum this snapshot was parsed from.
    pub version: String,
    intents: HashMap<String, IntentDefinition>,
    /// Intent ids in declaration order (stable iteration for prompts).
    order: Vec<String>,
}

impl IntentCatalog {
    /// Parse and validate a TOML catalogue.
    ///
    /// Hard failures (no intents, empty descriptions, no examples) are
    /// errors; soft issues (unknown tool action) come back as warnings.
    pub fn load_str(
        text: &str,
        version: impl Into<String>,
        cfg: &CatalogConfig,
        actions: Option<&ToolActionRegistry>,
    ) -> Result<(Self, Vec<ConfigError>)> {
        let file: CatalogFile =
            toml::from_str(text).map_err(|e| Error::Config(format!("intent catalogue: {e}")))?;

        let mut warnings = Vec::new();
        let mut intents = HashMap::new();
        let mut order = Vec::new();

        if file.intent.is_empty() {
            return Err(Error::Config("intent catalogue defines no intents".into()));
        }

        for (i, mut intent) in file.intent.into_iter().enumerate() {
            if intent.intent_id.is_empty() {
                return Err(Error::Config(format!("intent[{i}]: intent_id must not be empty")));
            }
            if intent.description.trim().is_empty() {
                return Err(Error::Config(format!(
                    "intent \"{}\": description must not be empty",
                    intent.intent_id
                )));
            }
            if intent.examples.is_empty() {
                return Err(Error::Config(format!(
                    "intent \"{}\": at least one example utterance is required",
                    intent.intent_id
                )));
            }
            if intents.contains_key(&intent.intent_id) {
                return Err(Error::Config(format!(
                    "duplicate intent id \"{}\"",
                    intent.intent_id
                )));
            }

            // Apply catalogue defaults.
            if intent.confidence_threshold.is_none() {
                intent.confidence_threshold = Some(cfg.default_confidence_threshold);
            }

            // Unknown tool action is a warning: the catalogue may load
            // before every adapter is registered.
            if let Some(ref action_id) = intent.tool_action_id {
                if let Some(registry) = actions {
                    if registry.get(action_id).is_none() {
                        warnings.push(ConfigError {
                            severity: ConfigSeverity::Warning,
                            field: format!("intent.{}.tool_action_id", intent.intent_id),
                            message: format!("references unknown tool action \"{action_id}\""),
                        });
                    }
                }
            }

            order.push(intent.intent_id.clone());
            intents.insert(intent.intent_id.clone(), intent);
        }

        Ok((
            Self {
                version: version.into(),
                intents,
                order,
            },
            warnings,
        ))
    }

    pub fn get(&self, intent_id: &str) -> Option<&IntentDefinition> {
        self.intents.get(intent_id)
    }

    /// Intents in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &IntentDefinition> {
        self.order.iter().filter_map(|id| self.intents.get(id))
    }

    pub fn intent_ids(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds the current catalogue snapshot. Readers always observe either
/// the old or the new snapshot in full, never a partial view.
pub struct IntentRegistry {
    current: RwLock<Arc<IntentCatalog>>,
}

impl IntentRegistry {
    pub fn new(catalog: IntentCatalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    /// The current snapshot. Cheap; clones an `Arc`.
    pub fn snapshot(&self) -> Arc<IntentCatalog> {
        self.current.read().clone()
    }

    /// Atomically replace the catalogue.
    pub fn swap(&self, catalog: IntentCatalog) {
        *self.current.write() = Arc::new(catalog);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
