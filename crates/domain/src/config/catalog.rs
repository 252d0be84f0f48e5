use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Intent catalogue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Intent catalogue source and hot-reload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Path to the declarative intent catalogue (TOML).
    #[serde(default = "d_catalog_path")]
    pub path: String,
    /// Seconds between checksum polls of the catalogue source.
    #[serde(default = "d_reload_interval_secs")]
    pub reload_interval_secs: u64,
    /// Default confidence threshold applied to intents that omit one.
    #[serde(default = "d_default_threshold")]
    pub default_confidence_threshold: f64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: d_catalog_path(),
            reload_interval_secs: d_reload_interval_secs(),
            default_confidence_threshold: d_default_threshold(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_catalog_path() -> String {
    "intents.toml".into()
}
fn d_reload_interval_secs() -> u64 {
    30
}
fn d_default_threshold() -> f64 {
    0.85
}
