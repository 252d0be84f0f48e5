//! Write-through session store.
//!
//! Sessions persist to the KV store under `session:{id}` wrapped in a
//! compression envelope, with per-key TTL renewed on every write. An
//! in-process LRU cache accelerates reads; entries carry a staleness
//! bound and fall through to the store once stale. Context snapshots
//! persist under `session:{id}:ctx:v{n}`.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;

use mando_domain::config::SessionsConfig;
use mando_domain::error::{Error, Result};
use mando_domain::trace::TraceEvent;

use crate::context::Context;
use crate::envelope::Envelope;
use crate::kv::KvStore;
use crate::lock::SessionLockMap;
use crate::session::{Session, SessionState, Turn};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Keys
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const SESSION_PREFIX: &str = "session:";

fn session_key(session_id: &str) -> String {
    format!("{SESSION_PREFIX}{session_id}")
}

fn ctx_version_key(session_id: &str, version: u64) -> String {
    format!("{SESSION_PREFIX}{session_id}:ctx:v{version}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CacheEntry {
    session: Session,
    fetched_at: Instant,
}

/// Write-through session store with an LRU read cache.
pub struct SessionStore {
    kv: Arc<dyn KvStore>,
    cfg: SessionsConfig,
    cache: Mutex<LruCache<String, CacheEntry>>,
    locks: SessionLockMap,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KvStore>, cfg: SessionsConfig) -> Self {
        // cache_capacity is validated non-zero at config load.
        let capacity = NonZeroUsize::new(cfg.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            kv,
            cfg,
            cache: Mutex::new(LruCache::new(capacity)),
            locks: SessionLockMap::new(),
        }
    }

    pub fn config(&self) -> &SessionsConfig {
        &self.cfg
    }

    /// Acquire the per-session turn lock. Hold the permit for the whole
    /// turn; it releases on drop.
    pub async fn lock(&self, session_id: &str) -> Result<tokio::sync::OwnedSemaphorePermit> {
        self.locks.acquire(session_id).await
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.cfg.ttl_minutes as u64 * 60)
    }

    fn staleness_bound(&self) -> Duration {
        Duration::from_secs(self.cfg.cache_staleness_minutes as u64 * 60)
    }

    // ── load / save ─────────────────────────────────────────────────

    /// Load a session. Fresh cache entries are served directly; stale or
    /// absent entries fall through to the KV store.
    pub async fn load(&self, session_id: &str) -> Result<Option<Session>> {
        {
            let mut cache = self.cache.lock();
            if let Some(entry) = cache.get(session_id) {
                if entry.fetched_at.elapsed() < self.staleness_bound() {
                    return Ok(Some(entry.session.clone()));
                }
                cache.pop(session_id);
            }
        }

        let Some(bytes) = self.kv.get(&session_key(session_id)).await? else {
            return Ok(None);
        };

        let envelope = Envelope::from_bytes(&bytes)?;
        let session: Session = serde_json::from_str(&envelope.open())?;

        self.cache.lock().put(
            session_id.to_owned(),
            CacheEntry {
                session: session.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(Some(session))
    }

    /// Write a session through to the KV store, renewing its TTL.
    ///
    /// The cache is updated before the store write, so it stays
    /// authoritative for the remainder of the request even when the
    /// write fails; the failure still surfaces as a retriable error.
    pub async fn save(&self, session: &Session) -> Result<()> {
        self.cache.lock().put(
            session.session_id.clone(),
            CacheEntry {
                session: session.clone(),
                fetched_at: Instant::now(),
            },
        );

        let json = serde_json::to_string(session)?;
        let envelope = Envelope::seal(&json, self.cfg.compress_threshold_bytes)?;
        self.kv
            .set(
                &session_key(&session.session_id),
                envelope.to_bytes()?,
                Some(self.ttl()),
            )
            .await
            .map_err(|e| Error::Store(format!("session write failed: {e}")))
    }

    // ── operations ──────────────────────────────────────────────────

    /// Load the session when a valid id is supplied, otherwise create a
    /// fresh one. Returns `(session, is_new)`.
    pub async fn create_or_load(
        &self,
        session_id: Option<&str>,
        user_id: &str,
    ) -> Result<(Session, bool)> {
        if let Some(id) = session_id {
            if let Some(mut session) = self.load(id).await? {
                if !session.is_expired(Utc::now()) {
                    session.touch(Utc::now());
                    TraceEvent::SessionResolved {
                        session_id: session.session_id.clone(),
                        user_id: user_id.to_owned(),
                        is_new: false,
                    }
                    .emit();
                    return Ok((session, false));
                }
                // Expired but not yet swept: discard and fall through.
                self.delete(id).await?;
            }
        }

        let session = Session::new(user_id, self.cfg.ttl_minutes);
        self.save(&session).await?;
        TraceEvent::SessionResolved {
            session_id: session.session_id.clone(),
            user_id: user_id.to_owned(),
            is_new: true,
        }
        .emit();
        Ok((session, true))
    }

    /// Append a turn and persist.
    pub async fn append_turn(&self, session_id: &str, turn: Turn) -> Result<()> {
        let mut session = self
            .load(session_id)
            .await?
            .ok_or_else(|| Error::Store(format!("unknown session: {session_id}")))?;
        session.append_turn(turn)?;
        self.save(&session).await
    }

    /// Mutate the session context under a closure and persist.
    pub async fn update_context<F>(&self, session_id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Context),
    {
        let mut session = self
            .load(session_id)
            .await?
            .ok_or_else(|| Error::Store(format!("unknown session: {session_id}")))?;
        mutate(&mut session.context);
        self.save(&session).await
    }

    /// Delete a session and its retained context snapshots.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        let versions = match self.load(session_id).await {
            Ok(Some(session)) => session.context_versions.clone(),
            _ => Vec::new(),
        };
        self.cache.lock().pop(session_id);
        self.kv.delete(&session_key(session_id)).await?;
        for version in versions {
            self.kv.delete(&ctx_version_key(session_id, version)).await?;
        }
        Ok(())
    }

    /// Session ids whose TTL elapsed before `now` (for the cleanup sweep).
    pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let keys = self.kv.scan_expired(SESSION_PREFIX, now).await?;
        Ok(keys
            .into_iter()
            .filter(|key| !key.contains(":ctx:"))
            .map(|key| key[SESSION_PREFIX.len()..].to_owned())
            .collect())
    }

    // ── context versioning ──────────────────────────────────────────

    /// Snapshot the current context as a new retained version, evicting
    /// the oldest snapshot beyond the configured limit.
    pub async fn snapshot_context(&self, session: &mut Session) -> Result<()> {
        let version = session.next_context_version;
        session.next_context_version += 1;

        let json = serde_json::to_string(&session.context)?;
        let envelope = Envelope::seal(&json, self.cfg.compress_threshold_bytes)?;
        self.kv
            .set(
                &ctx_version_key(&session.session_id, version),
                envelope.to_bytes()?,
                Some(self.ttl()),
            )
            .await?;

        session.context_versions.push(version);
        while session.context_versions.len() > self.cfg.max_context_versions {
            let evicted = session.context_versions.remove(0);
            self.kv
                .delete(&ctx_version_key(&session.session_id, evicted))
                .await?;
        }
        Ok(())
    }

    /// Replace the current context with retained snapshot `index`
    /// (0 = oldest retained). The pre-restore context is snapshotted
    /// first so the restore itself can be undone.
    pub async fn restore_version(&self, session_id: &str, index: usize) -> Result<()> {
        let mut session = self
            .load(session_id)
            .await?
            .ok_or_else(|| Error::Store(format!("unknown session: {session_id}")))?;

        let &version = session
            .context_versions
            .get(index)
            .ok_or_else(|| Error::Validation(format!("no context version at index {index}")))?;

        let bytes = self
            .kv
            .get(&ctx_version_key(session_id, version))
            .await?
            .ok_or_else(|| Error::Store(format!("context snapshot v{version} missing")))?;
        let restored: Context = serde_json::from_str(&Envelope::from_bytes(&bytes)?.open())?;

        self.snapshot_context(&mut session).await?;
        session.context = restored;
        self.save(&session).await
    }

    // ── compaction ──────────────────────────────────────────────────

    /// Fold turns older than the retention window into the conversation
    /// summary and raise the compression level. A no-op when the session
    /// fits the window.
    pub async fn compact(&self, session_id: &str) -> Result<()> {
        let mut session = self
            .load(session_id)
            .await?
            .ok_or_else(|| Error::Store(format!("unknown session: {session_id}")))?;

        let window = self.cfg.compaction_window_turns;
        if session.turns.len() <= window {
            return Ok(());
        }

        self.snapshot_context(&mut session).await?;

        let split = session.turns.len() - window;
        let folded: Vec<Turn> = session.turns.drain(..split).collect();

        let mut summary = String::new();
        for turn in &folded {
            summary.push_str(&format!(
                "[{}] usuario: {} | asistente: {}\n",
                turn.turn_id, turn.user_text, turn.assistant_text
            ));
        }
        if !session.context.conversation_summary.is_empty() {
            session.context.conversation_summary.push('\n');
        }
        session.context.conversation_summary.push_str(summary.trim_end());
        session.context.compression_level += 1;

        TraceEvent::ContextCompacted {
            session_id: session.session_id.clone(),
            compression_level: session.context.compression_level,
            turns_folded: folded.len(),
        }
        .emit();

        self.save(&session).await
    }

    /// Mark a session terminal without deleting it.
    pub async fn set_state(&self, session_id: &str, state: SessionState) -> Result<()> {
        let mut session = self
            .load(session_id)
            .await?
            .ok_or_else(|| Error::Store(format!("unknown session: {session_id}")))?;
        session.state = state;
        self.save(&session).await
    }

    /// Drop idle per-session locks (periodic hygiene).
    pub fn prune_locks(&self) {
        self.locks.prune_idle();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;
    use std::collections::BTreeMap;

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(InMemoryKv::new()), SessionsConfig::default())
    }

    fn store_with(cfg: SessionsConfig) -> SessionStore {
        SessionStore::new(Arc::new(InMemoryKv::new()), cfg)
    }

    fn turn(id: u64, text: &str) -> Turn {
        Turn {
            turn_id: id,
            user_text: text.into(),
            assistant_text: format!("re: {text}"),
            intent_id: None,
            confidence: None,
            slots_snapshot: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    // ── create / load ───────────────────────────────────────────────

    #[tokio::test]
    async fn create_then_load_roundtrip() {
        let store = store();
        let (session, is_new) = store.create_or_load(None, "user-1").await.unwrap();
        assert!(is_new);

        let loaded = store.load(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.user_id, "user-1");
        assert_eq!(loaded.state, SessionState::Active);
    }

    #[tokio::test]
    async fn load_existing_by_id() {
        let store = store();
        let (session, _) = store.create_or_load(None, "user-1").await.unwrap();
        let (again, is_new) = store
            .create_or_load(Some(&session.session_id), "user-1")
            .await
            .unwrap();
        assert!(!is_new);
        assert_eq!(again.session_id, session.session_id);
    }

    #[tokio::test]
    async fn unknown_id_creates_fresh() {
        let store = store();
        let (session, is_new) = store.create_or_load(Some("ghost"), "user-1").await.unwrap();
        assert!(is_new);
        assert_ne!(session.session_id, "ghost");
    }

    #[tokio::test]
    async fn expired_session_is_replaced() {
        let store = store();
        let (mut session, _) = store.create_or_load(None, "user-1").await.unwrap();
        session.last_activity_at = Utc::now() - chrono::Duration::minutes(90);
        store.save(&session).await.unwrap();

        let (fresh, is_new) = store
            .create_or_load(Some(&session.session_id), "user-1")
            .await
            .unwrap();
        assert!(is_new);
        assert_ne!(fresh.session_id, session.session_id);
    }

    // ── cache behavior ──────────────────────────────────────────────

    #[tokio::test]
    async fn fresh_cache_serves_after_kv_loss() {
        let kv = Arc::new(InMemoryKv::new());
        let store = SessionStore::new(kv.clone(), SessionsConfig::default());
        let (session, _) = store.create_or_load(None, "user-1").await.unwrap();

        // Simulate the backing store losing the key; the fresh cache
        // entry still serves the read.
        kv.delete(&session_key(&session.session_id)).await.unwrap();
        let loaded = store.load(&session.session_id).await.unwrap();
        assert!(loaded.is_some());
    }

    // ── turns and context ───────────────────────────────────────────

    #[tokio::test]
    async fn append_turn_persists() {
        let store = store();
        let (session, _) = store.create_or_load(None, "user-1").await.unwrap();
        store
            .append_turn(&session.session_id, turn(1, "hola"))
            .await
            .unwrap();

        let loaded = store.load(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.turns.len(), 1);
        assert_eq!(loaded.total_turns, 1);
    }

    #[tokio::test]
    async fn update_context_persists() {
        let store = store();
        let (session, _) = store.create_or_load(None, "user-1").await.unwrap();
        store
            .update_context(&session.session_id, |ctx| {
                ctx.active_intent = Some("consultar_tiempo".into());
            })
            .await
            .unwrap();

        let loaded = store.load(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.context.active_intent.as_deref(), Some("consultar_tiempo"));
    }

    // ── delete / expiry ─────────────────────────────────────────────

    #[tokio::test]
    async fn delete_removes_session() {
        let store = store();
        let (session, _) = store.create_or_load(None, "user-1").await.unwrap();
        store.delete(&session.session_id).await.unwrap();
        assert!(store.load(&session.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_expired_skips_ctx_keys() {
        let mut cfg = SessionsConfig::default();
        cfg.cache_staleness_minutes = 0; // disable cache for this test
        let kv = Arc::new(InMemoryKv::new());
        let store = SessionStore::new(kv.clone(), cfg);

        let (mut session, _) = store.create_or_load(None, "user-1").await.unwrap();
        store.snapshot_context(&mut session).await.unwrap();
        store.save(&session).await.unwrap();

        // Force both keys to expire immediately.
        kv.expire(&session_key(&session.session_id), Duration::from_millis(1))
            .await
            .unwrap();
        kv.expire(
            &ctx_version_key(&session.session_id, 0),
            Duration::from_millis(1),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let expired = store.list_expired(Utc::now()).await.unwrap();
        assert_eq!(expired, vec![session.session_id.clone()]);
    }

    // ── versioning ──────────────────────────────────────────────────

    #[tokio::test]
    async fn snapshot_evicts_oldest_beyond_limit() {
        let mut cfg = SessionsConfig::default();
        cfg.max_context_versions = 2;
        let store = store_with(cfg);

        let (mut session, _) = store.create_or_load(None, "user-1").await.unwrap();
        for _ in 0..4 {
            store.snapshot_context(&mut session).await.unwrap();
        }
        assert_eq!(session.context_versions, vec![2, 3]);
    }

    #[tokio::test]
    async fn restore_version_replaces_context() {
        let store = store();
        let (mut session, _) = store.create_or_load(None, "user-1").await.unwrap();

        session.context.active_intent = Some("v0_intent".into());
        store.snapshot_context(&mut session).await.unwrap();

        session.context.active_intent = Some("current_intent".into());
        store.save(&session).await.unwrap();

        store.restore_version(&session.session_id, 0).await.unwrap();
        let loaded = store.load(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.context.active_intent.as_deref(), Some("v0_intent"));
        // The pre-restore context was snapshotted, so v0 plus one more.
        assert_eq!(loaded.context_versions.len(), 2);
    }

    #[tokio::test]
    async fn restore_bad_index_is_validation_error() {
        let store = store();
        let (session, _) = store.create_or_load(None, "user-1").await.unwrap();
        let err = store.restore_version(&session.session_id, 3).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    // ── compaction ──────────────────────────────────────────────────

    #[tokio::test]
    async fn compact_folds_old_turns_and_bumps_level() {
        let mut cfg = SessionsConfig::default();
        cfg.compaction_window_turns = 2;
        let store = store_with(cfg);

        let (session, _) = store.create_or_load(None, "user-1").await.unwrap();
        for id in 1..=5 {
            store
                .append_turn(&session.session_id, turn(id, &format!("mensaje {id}")))
                .await
                .unwrap();
        }

        store.compact(&session.session_id).await.unwrap();

        let loaded = store.load(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.turns.len(), 2);
        assert_eq!(loaded.turns[0].turn_id, 4);
        assert_eq!(loaded.context.compression_level, 1);
        assert!(loaded.context.conversation_summary.contains("mensaje 1"));
        assert!(loaded.context.conversation_summary.contains("mensaje 3"));
        assert!(!loaded.context.conversation_summary.contains("mensaje 4"));
    }

    #[tokio::test]
    async fn compact_within_window_is_noop() {
        let store = store();
        let (session, _) = store.create_or_load(None, "user-1").await.unwrap();
        store
            .append_turn(&session.session_id, turn(1, "hola"))
            .await
            .unwrap();
        store.compact(&session.session_id).await.unwrap();

        let loaded = store.load(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.turns.len(), 1);
        assert_eq!(loaded.context.compression_level, 0);
    }

    #[tokio::test]
    async fn compression_level_is_monotone() {
        let mut cfg = SessionsConfig::default();
        cfg.compaction_window_turns = 1;
        let store = store_with(cfg);

        let (session, _) = store.create_or_load(None, "user-1").await.unwrap();
        let mut last_level = 0;
        for id in 1..=6 {
            store
                .append_turn(&session.session_id, turn(id, "m"))
                .await
                .unwrap();
            store.compact(&session.session_id).await.unwrap();
            let level = store
                .load(&session.session_id)
                .await
                .unwrap()
                .unwrap()
                .context
                .compression_level;
            assert!(level >= last_level);
            last_level = level;
        }
        assert!(last_level > 0);
    }
}
