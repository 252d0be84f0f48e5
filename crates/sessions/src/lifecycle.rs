//! Expired-session cleanup sweep.
//!
//! An explicit background loop with a configurable interval and a stop
//! signal; the runtime spawns it at startup and signals it at shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use mando_domain::trace::TraceEvent;

use crate::store::SessionStore;

/// Run one sweep: delete every session whose TTL has elapsed.
///
/// Returns the number of sessions removed.
pub async fn sweep_once(store: &SessionStore) -> usize {
    let expired = match store.list_expired(Utc::now()).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(error = %e, "expired-session scan failed");
            return 0;
        }
    };

    let mut removed = 0;
    for session_id in expired {
        match store.delete(&session_id).await {
            Ok(()) => {
                TraceEvent::SessionExpired {
                    session_id,
                    idle_minutes: store.config().ttl_minutes as i64,
                }
                .emit();
                removed += 1;
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "expired-session delete failed");
            }
        }
    }

    store.prune_locks();
    removed
}

/// Background cleanup loop. Exits when `stop` flips to `true`.
pub async fn run_cleanup_loop(store: Arc<SessionStore>, mut stop: watch::Receiver<bool>) {
    let interval = Duration::from_secs(store.config().cleanup_interval_secs.max(1));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = sweep_once(&store).await;
                if removed > 0 {
                    tracing::debug!(removed, "session cleanup sweep");
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    tracing::debug!("session cleanup loop stopping");
                    return;
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{InMemoryKv, KvStore};
    use mando_domain::config::SessionsConfig;

    #[tokio::test]
    async fn sweep_removes_expired_sessions_only() {
        let kv = Arc::new(InMemoryKv::new());
        let store = SessionStore::new(kv.clone(), SessionsConfig::default());

        let (kept, _) = store.create_or_load(None, "user-a").await.unwrap();
        let (doomed, _) = store.create_or_load(None, "user-b").await.unwrap();

        kv.expire(
            &format!("session:{}", doomed.session_id),
            Duration::from_millis(1),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let removed = sweep_once(&store).await;
        assert_eq!(removed, 1);
        assert!(store.load(&kept.session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cleanup_loop_stops_on_signal() {
        let store = Arc::new(SessionStore::new(
            Arc::new(InMemoryKv::new()),
            SessionsConfig::default(),
        ));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_cleanup_loop(store, rx));
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop promptly")
            .unwrap();
    }
}
