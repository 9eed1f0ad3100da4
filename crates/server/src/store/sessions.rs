use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use super::{durable_outcome, StoreError, StoreFuture};

/// Persisted refresh session. Only the hash of the refresh secret is kept.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SessionRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub refresh_hash: String,
    pub csrf_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Replacement triple written by a rotation.
///
/// When `expected_refresh_hash` is set the write only applies if the stored
/// hash still matches it, so two rotations racing from the same verified
/// credential cannot both win.
#[derive(Debug, Clone)]
pub struct SessionRotation {
    pub refresh_hash: String,
    pub csrf_token: String,
    pub expires_at: DateTime<Utc>,
    pub expected_refresh_hash: Option<String>,
}

pub trait SessionBackend: Send + Sync {
    fn put(&self, record: SessionRecord) -> StoreFuture<'_, ()>;

    fn get(&self, id: Uuid) -> StoreFuture<'_, Option<SessionRecord>>;

    /// Returns false when no record was updated.
    fn update(&self, id: Uuid, rotation: SessionRotation) -> StoreFuture<'_, bool>;

    fn delete(&self, id: Uuid) -> StoreFuture<'_, bool>;

    fn delete_expired_before(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64>;
}

pub struct PgSessionBackend {
    pool: PgPool,
}

impl PgSessionBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl SessionBackend for PgSessionBackend {
    fn put(&self, record: SessionRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r#"
                INSERT INTO sessions (id, account_id, refresh_hash, csrf_token, expires_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(record.id)
            .bind(record.account_id)
            .bind(&record.refresh_hash)
            .bind(&record.csrf_token)
            .bind(record.expires_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn get(&self, id: Uuid) -> StoreFuture<'_, Option<SessionRecord>> {
        Box::pin(async move {
            let record = sqlx::query_as::<_, SessionRecord>(
                r#"
                SELECT id, account_id, refresh_hash, csrf_token, expires_at
                FROM sessions
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(record)
        })
    }

    fn update(&self, id: Uuid, rotation: SessionRotation) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                UPDATE sessions
                SET refresh_hash = $2, csrf_token = $3, expires_at = $4
                WHERE id = $1 AND ($5::text IS NULL OR refresh_hash = $5)
                "#,
            )
            .bind(id)
            .bind(&rotation.refresh_hash)
            .bind(&rotation.csrf_token)
            .bind(rotation.expires_at)
            .bind(rotation.expected_refresh_hash.as_deref())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn delete(&self, id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn delete_expired_before(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM sessions WHERE expires_at < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
    }
}

/// Process-local session map. Never fails.
#[derive(Debug, Default)]
pub struct MemorySessionBackend {
    sessions: RwLock<HashMap<Uuid, SessionRecord>>,
}

impl SessionBackend for MemorySessionBackend {
    fn put(&self, record: SessionRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.sessions.write().await.insert(record.id, record);
            Ok(())
        })
    }

    fn get(&self, id: Uuid) -> StoreFuture<'_, Option<SessionRecord>> {
        Box::pin(async move { Ok(self.sessions.read().await.get(&id).cloned()) })
    }

    fn update(&self, id: Uuid, rotation: SessionRotation) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut guard = self.sessions.write().await;
            let Some(record) = guard.get_mut(&id) else {
                return Ok(false);
            };
            if let Some(expected) = rotation.expected_refresh_hash.as_deref() {
                if record.refresh_hash != expected {
                    return Ok(false);
                }
            }
            record.refresh_hash = rotation.refresh_hash;
            record.csrf_token = rotation.csrf_token;
            record.expires_at = rotation.expires_at;
            Ok(true)
        })
    }

    fn delete(&self, id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(async move { Ok(self.sessions.write().await.remove(&id).is_some()) })
    }

    fn delete_expired_before(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut guard = self.sessions.write().await;
            let before = guard.len();
            guard.retain(|_, record| record.expires_at >= cutoff);
            Ok((before - guard.len()) as u64)
        })
    }
}

/// Counts of records removed by one pruning sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    /// `None` when the durable tier is absent or failed during the sweep.
    pub durable: Option<u64>,
    pub volatile: u64,
}

/// Session persistence with durable-first, volatile-fallback semantics.
#[derive(Clone)]
pub struct SessionStore {
    durable: Option<Arc<dyn SessionBackend>>,
    volatile: Arc<MemorySessionBackend>,
}

impl SessionStore {
    pub fn volatile_only() -> Self {
        Self { durable: None, volatile: Arc::new(MemorySessionBackend::default()) }
    }

    pub fn with_durable(durable: Arc<dyn SessionBackend>) -> Self {
        Self { durable: Some(durable), volatile: Arc::new(MemorySessionBackend::default()) }
    }

    pub async fn put(&self, record: SessionRecord) -> Result<(), StoreError> {
        if let Some(durable) = &self.durable {
            let result = durable.put(record.clone()).await;
            if let Some(outcome) = durable_outcome("sessions", "put", result) {
                return outcome;
            }
        }
        self.volatile.put(record).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<SessionRecord>, StoreError> {
        if let Some(durable) = &self.durable {
            if let Some(outcome) = durable_outcome("sessions", "get", durable.get(id).await) {
                return outcome;
            }
        }
        self.volatile.get(id).await
    }

    pub async fn update(&self, id: Uuid, rotation: SessionRotation) -> Result<bool, StoreError> {
        if let Some(durable) = &self.durable {
            let result = durable.update(id, rotation.clone()).await;
            if let Some(outcome) = durable_outcome("sessions", "update", result) {
                return outcome;
            }
        }
        self.volatile.update(id, rotation).await
    }

    /// Removes the id from both tiers. A session created during an outage
    /// lives only in the volatile tier, whatever the durable tier says later.
    pub async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let volatile_removed = self.volatile.delete(id).await?;
        let durable_removed = match &self.durable {
            Some(durable) => {
                match durable_outcome("sessions", "delete", durable.delete(id).await) {
                    Some(outcome) => outcome?,
                    None => false,
                }
            }
            None => false,
        };
        Ok(durable_removed || volatile_removed)
    }

    /// Sweeps both tiers. Durable failures are logged and reported as `None`.
    pub async fn delete_expired_before(&self, cutoff: DateTime<Utc>) -> PruneReport {
        let durable = match &self.durable {
            Some(durable) => match durable.delete_expired_before(cutoff).await {
                Ok(removed) => Some(removed),
                Err(error) => {
                    warn!(error = %error, "durable session prune failed");
                    None
                }
            },
            None => None,
        };

        let volatile = self.volatile.delete_expired_before(cutoff).await.unwrap_or_default();

        PruneReport { durable, volatile }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{MemorySessionBackend, SessionRecord, SessionRotation, SessionStore};
    use crate::store::testing::{SwitchableBackend, UnreachableBackend};

    fn record(expires_in: Duration) -> SessionRecord {
        SessionRecord {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            refresh_hash: "hash-1".to_owned(),
            csrf_token: "csrf-1".to_owned(),
            expires_at: Utc::now() + expires_in,
        }
    }

    fn rotation(expected: Option<&str>) -> SessionRotation {
        SessionRotation {
            refresh_hash: "hash-2".to_owned(),
            csrf_token: "csrf-2".to_owned(),
            expires_at: Utc::now() + Duration::days(7),
            expected_refresh_hash: expected.map(ToOwned::to_owned),
        }
    }

    #[tokio::test]
    async fn durable_tier_serves_when_reachable() {
        let durable = Arc::new(MemorySessionBackend::default());
        let store = SessionStore::with_durable(durable.clone());
        let session = record(Duration::days(1));

        store.put(session.clone()).await.expect("put should succeed");

        assert_eq!(store.get(session.id).await.expect("get"), Some(session.clone()));
        assert!(store.volatile.sessions.read().await.is_empty());
        assert!(durable.sessions.read().await.contains_key(&session.id));
    }

    #[tokio::test]
    async fn falls_back_to_volatile_tier_when_durable_is_unreachable() {
        let store = SessionStore::with_durable(Arc::new(UnreachableBackend));
        let session = record(Duration::days(1));

        store.put(session.clone()).await.expect("put should fall back");
        assert_eq!(store.get(session.id).await.expect("get"), Some(session.clone()));
        assert!(store.update(session.id, rotation(None)).await.expect("update"));

        let rotated = store.get(session.id).await.expect("get").expect("session present");
        assert_eq!(rotated.refresh_hash, "hash-2");
        assert_eq!(rotated.csrf_token, "csrf-2");

        assert!(store.delete(session.id).await.expect("delete"));
        assert!(!store.delete(session.id).await.expect("delete"));
    }

    #[tokio::test]
    async fn update_of_missing_session_returns_false() {
        let store = SessionStore::volatile_only();
        assert!(!store.update(Uuid::new_v4(), rotation(None)).await.expect("update"));
    }

    #[tokio::test]
    async fn conditional_update_requires_matching_hash() {
        let store = SessionStore::volatile_only();
        let session = record(Duration::days(1));
        store.put(session.clone()).await.expect("put");

        assert!(!store.update(session.id, rotation(Some("stale"))).await.expect("update"));
        let unchanged = store.get(session.id).await.expect("get").expect("present");
        assert_eq!(unchanged, session);

        assert!(store.update(session.id, rotation(Some("hash-1"))).await.expect("update"));
        assert!(!store.update(session.id, rotation(Some("hash-1"))).await.expect("update"));
    }

    #[tokio::test]
    async fn prune_removes_only_expired_sessions_from_both_tiers() {
        let durable = Arc::new(MemorySessionBackend::default());
        let store = SessionStore::with_durable(durable.clone());
        let expired = record(-Duration::minutes(1));
        let live = record(Duration::days(1));
        store.put(expired.clone()).await.expect("put");
        store.put(live.clone()).await.expect("put");
        store.volatile.put_for_test(record(-Duration::hours(2))).await;

        let report = store.delete_expired_before(Utc::now()).await;

        assert_eq!(report.durable, Some(1));
        assert_eq!(report.volatile, 1);
        assert!(store.get(expired.id).await.expect("get").is_none());
        assert!(store.get(live.id).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn prune_swallows_durable_failures() {
        let store = SessionStore::with_durable(Arc::new(UnreachableBackend));
        store.put(record(-Duration::minutes(5))).await.expect("put");

        let report = store.delete_expired_before(Utc::now()).await;

        assert_eq!(report.durable, None);
        assert_eq!(report.volatile, 1);
    }

    #[tokio::test]
    async fn delete_reaches_volatile_record_after_durable_recovers() {
        let durable = Arc::new(SwitchableBackend::unreachable());
        let store = SessionStore::with_durable(durable.clone());
        let session = record(Duration::days(1));
        store.put(session.clone()).await.expect("put should fall back");

        durable.set_reachable(true);
        assert!(store.get(session.id).await.expect("get").is_none());
        assert!(store.delete(session.id).await.expect("delete"));

        durable.set_reachable(false);
        assert!(store.get(session.id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn delete_reports_durable_removal_when_volatile_is_empty() {
        let durable = Arc::new(MemorySessionBackend::default());
        let store = SessionStore::with_durable(durable.clone());
        let session = record(Duration::days(1));
        store.put(session.clone()).await.expect("put");

        assert!(store.delete(session.id).await.expect("delete"));
        assert!(!store.delete(session.id).await.expect("delete"));
        assert!(durable.sessions.read().await.is_empty());
    }

    impl MemorySessionBackend {
        async fn put_for_test(&self, record: SessionRecord) {
            self.sessions.write().await.insert(record.id, record);
        }
    }
}
