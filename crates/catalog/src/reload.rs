//! Intent catalogue hot reload.
//!
//! Periodically hashes the catalogue source; on change, parses and
//! validates it, then atomically swaps the registry snapshot. A source
//! that fails to parse keeps the old catalogue in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::watch;

use mando_domain::config::CatalogConfig;
use mando_domain::error::Result;
use mando_domain::trace::TraceEvent;

use crate::actions::ToolActionRegistry;
use crate::intents::{IntentCatalog, IntentRegistry};

/// Hex sha256 of the catalogue source text.
pub fn checksum(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Load the catalogue from disk, logging validation warnings.
pub fn load_catalog_file(
    path: &Path,
    cfg: &CatalogConfig,
    actions: Option<&ToolActionRegistry>,
) -> Result<IntentCatalog> {
    let text = std::fs::read_to_string(path)?;
    let version = checksum(&text);
    let (catalog, warnings) = IntentCatalog::load_str(&text, version, cfg, actions)?;
    for warning in &warnings {
        tracing::warn!(issue = %warning, "intent catalogue");
    }
    Ok(catalog)
}

/// Reload the catalogue if the source checksum changed.
///
/// Returns `true` when a swap happened. Parse or validation failures
/// leave the current catalogue untouched.
pub async fn reload_if_changed(
    registry: &IntentRegistry,
    path: &Path,
    cfg: &CatalogConfig,
    actions: Option<&ToolActionRegistry>,
) -> bool {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "catalogue source unreadable");
            return false;
        }
    };

    let version = checksum(&text);
    if registry.snapshot().version == version {
        return false;
    }

    match IntentCatalog::load_str(&text, version.clone(), cfg, actions) {
        Ok((catalog, warnings)) => {
            for warning in &warnings {
                tracing::warn!(issue = %warning, "intent catalogue");
            }
            let intents = catalog.len();
            registry.swap(catalog);
            TraceEvent::CatalogReloaded { version, intents }.emit();
            true
        }
        Err(e) => {
            TraceEvent::CatalogReloadRejected {
                reason: e.to_string(),
            }
            .emit();
            false
        }
    }
}

/// Background hot-reload loop. Exits when `stop` flips to `true`.
pub async fn run_reload_loop(
    registry: Arc<IntentRegistry>,
    actions: Arc<ToolActionRegistry>,
    cfg: CatalogConfig,
    mut stop: watch::Receiver<bool>,
) {
    let path = PathBuf::from(&cfg.path);
    let interval = Duration::from_secs(cfg.reload_interval_secs.max(1));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                reload_if_changed(&registry, &path, &cfg, Some(&actions)).await;
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    tracing::debug!("catalogue reload loop stopping");
                    return;
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
