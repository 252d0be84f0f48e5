use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session persistence and lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Idle TTL in minutes. Renewed on every turn.
    #[serde(default = "d_ttl_minutes")]
    pub ttl_minutes: u32,
    /// Capacity of the in-process LRU read cache.
    #[serde(default = "d_cache_capacity")]
    pub cache_capacity: usize,
    /// Staleness bound for cache entries, in minutes. A stale entry falls
    /// through to the backing store on the next read.
    #[serde(default = "d_cache_staleness_minutes")]
    pub cache_staleness_minutes: u32,
    /// Serialized payloads above this byte size are deflate-compressed.
    #[serde(default = "d_compress_threshold")]
    pub compress_threshold_bytes: usize,
    /// Prior context snapshots retained per session, oldest evicted first.
    #[serde(default = "d_max_context_versions")]
    pub max_context_versions: usize,
    /// Turns kept verbatim; older turns fold into the summary on compaction.
    #[serde(default = "d_compaction_window")]
    pub compaction_window_turns: usize,
    /// Interval of the expired-session cleanup sweep, in seconds.
    #[serde(default = "d_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: d_ttl_minutes(),
            cache_capacity: d_cache_capacity(),
            cache_staleness_minutes: d_cache_staleness_minutes(),
            compress_threshold_bytes: d_compress_threshold(),
            max_context_versions: d_max_context_versions(),
            compaction_window_turns: d_compaction_window(),
            cleanup_interval_secs: d_cleanup_interval_secs(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_ttl_minutes() -> u32 {
    30
}
fn d_cache_capacity() -> usize {
    1024
}
fn d_cache_staleness_minutes() -> u32 {
    30
}
fn d_compress_threshold() -> usize {
    4096
}
fn d_max_context_versions() -> usize {
    5
}
fn d_compaction_window() -> usize {
    10
}
fn d_cleanup_interval_secs() -> u64 {
    60
}
