//! Per-session shared conversational state.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entity cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Last known value for an entity type, with the turn timestamp that
/// produced it. Same-key writes keep the most recent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntity {
    pub value: String,
    pub confidence: f64,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pending slots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Slot-filling state carried across turns while a question is pending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSlots {
    pub intent_id: String,
    /// Slots already filled, slot name → normalized value.
    #[serde(default)]
    pub filled: BTreeMap<String, String>,
    /// Confidence of each filled value (higher-confidence values win on
    /// merge).
    #[serde(default)]
    pub confidences: HashMap<String, f64>,
    /// Required slots still missing, in stable ask order.
    #[serde(default)]
    pub missing: Vec<String>,
    /// Questions asked so far, per slot.
    #[serde(default)]
    pub attempts: HashMap<String, u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared state across all turns of one session.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Context {
    /// Entity type name → last known value.
    #[serde(default)]
    pub entity_cache: HashMap<String, CachedEntity>,
    /// Compressed prose summary of turns older than the retention window.
    #[serde(default)]
    pub conversation_summary: String,
    #[serde(default)]
    pub active_intent: Option<String>,
    #[serde(default)]
    pub pending_slots: Option<PendingSlots>,
    /// Conversation topics, most recent last.
    #[serde(default)]
    pub topic_stack: Vec<String>,
    /// Monotonically non-decreasing compaction counter.
    #[serde(default)]
    pub compression_level: u32,
    /// Device/location metadata used by context-analysis fallback
    /// (keys: `device_type`, `location`, …).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Context {
    /// Record an entity observation; newer timestamps win.
    pub fn cache_entity(
        &mut self,
        entity_type: &str,
        value: impl Into<String>,
        confidence: f64,
        at: DateTime<Utc>,
    ) {
        match self.entity_cache.get(entity_type) {
            Some(existing) if existing.updated_at > at => {}
            _ => {
                self.entity_cache.insert(
                    entity_type.to_owned(),
                    CachedEntity {
                        value: value.into(),
                        confidence,
                        updated_at: at,
                    },
                );
            }
        }
    }

    /// Push a topic, deduplicating a repeat of the current top.
    pub fn push_topic(&mut self, topic: impl Into<String>) {
        let topic = topic.into();
        if self.topic_stack.last() != Some(&topic) {
            self.topic_stack.push(topic);
        }
    }

    /// Current topic, if any.
    pub fn current_topic(&self) -> Option<&str> {
        self.topic_stack.last().map(String::as_str)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_entity_keeps_most_recent() {
        let mut ctx = Context::default();
        let earlier = Utc::now() - chrono::Duration::minutes(5);
        let later = Utc::now();

        ctx.cache_entity("location", "Madrid", 0.9, later);
        ctx.cache_entity("location", "Sevilla", 0.95, earlier);

        assert_eq!(ctx.entity_cache["location"].value, "Madrid");
    }

    #[test]
    fn cache_entity_overwrites_older() {
        let mut ctx = Context::default();
        let earlier = Utc::now() - chrono::Duration::minutes(5);
        ctx.cache_entity("time", "07:00", 0.8, earlier);
        ctx.cache_entity("time", "08:30", 0.8, Utc::now());
        assert_eq!(ctx.entity_cache["time"].value, "08:30");
    }

    #[test]
    fn push_topic_dedupes_top() {
        let mut ctx = Context::default();
        ctx.push_topic("musica");
        ctx.push_topic("musica");
        ctx.push_topic("tiempo");
        ctx.push_topic("musica");
        assert_eq!(ctx.topic_stack, vec!["musica", "tiempo", "musica"]);
        assert_eq!(ctx.current_topic(), Some("musica"));
    }

    #[test]
    fn context_serde_roundtrip() {
        let mut ctx = Context::default();
        ctx.cache_entity("location", "Madrid", 0.9, Utc::now());
        ctx.active_intent = Some("consultar_tiempo".into());
        ctx.compression_level = 2;
        ctx.pending_slots = Some(PendingSlots {
            intent_id: "programar_alarma".into(),
            filled: BTreeMap::new(),
            confidences: HashMap::new(),
            missing: vec!["hora".into()],
            attempts: HashMap::new(),
        });

        let json = serde_json::to_string(&ctx).unwrap();
        let back: Context = serde_json::from_str(&json).unwrap();
        assert_eq!(back.compression_level, 2);
        assert_eq!(back.entity_cache["location"].value, "Madrid");
        assert_eq!(back.pending_slots.unwrap().missing, vec!["hora"]);
    }
}
