use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{durable_outcome, StoreError, StoreFuture};

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AccountRecord {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

pub trait AccountBackend: Send + Sync {
    /// Fails with [`StoreError::Conflict`] when the email is taken.
    fn insert(&self, record: AccountRecord) -> StoreFuture<'_, ()>;

    fn find_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Option<AccountRecord>>;

    fn find_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<AccountRecord>>;

    fn update_password<'a>(&'a self, id: Uuid, password_hash: &'a str) -> StoreFuture<'a, bool>;

    /// Fails with [`StoreError::Conflict`] when the email is taken.
    fn update_email<'a>(&'a self, id: Uuid, email: &'a str) -> StoreFuture<'a, bool>;
}

pub struct PgAccountBackend {
    pool: PgPool,
}

impl PgAccountBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AccountBackend for PgAccountBackend {
    fn insert(&self, record: AccountRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r#"
                INSERT INTO accounts (id, email, password_hash, created_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(record.id)
            .bind(&record.email)
            .bind(&record.password_hash)
            .bind(record.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn find_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Option<AccountRecord>> {
        Box::pin(async move {
            let record = sqlx::query_as::<_, AccountRecord>(
                "SELECT id, email, password_hash, created_at FROM accounts WHERE email = $1",
            )
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
            Ok(record)
        })
    }

    fn find_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<AccountRecord>> {
        Box::pin(async move {
            let record = sqlx::query_as::<_, AccountRecord>(
                "SELECT id, email, password_hash, created_at FROM accounts WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(record)
        })
    }

    fn update_password<'a>(&'a self, id: Uuid, password_hash: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query("UPDATE accounts SET password_hash = $2 WHERE id = $1")
                .bind(id)
                .bind(password_hash)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn update_email<'a>(&'a self, id: Uuid, email: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query("UPDATE accounts SET email = $2 WHERE id = $1")
                .bind(id)
                .bind(email)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }
}

/// Shadow registry for accounts created while the database was unreachable.
#[derive(Debug, Default)]
pub struct MemoryAccountBackend {
    accounts: RwLock<HashMap<Uuid, AccountRecord>>,
}

impl AccountBackend for MemoryAccountBackend {
    fn insert(&self, record: AccountRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut guard = self.accounts.write().await;
            if guard.values().any(|existing| existing.email == record.email) {
                return Err(StoreError::Conflict);
            }
            guard.insert(record.id, record);
            Ok(())
        })
    }

    fn find_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Option<AccountRecord>> {
        Box::pin(async move {
            Ok(self.accounts.read().await.values().find(|record| record.email == email).cloned())
        })
    }

    fn find_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<AccountRecord>> {
        Box::pin(async move { Ok(self.accounts.read().await.get(&id).cloned()) })
    }

    fn update_password<'a>(&'a self, id: Uuid, password_hash: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut guard = self.accounts.write().await;
            match guard.get_mut(&id) {
                Some(record) => {
                    record.password_hash = password_hash.to_owned();
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn update_email<'a>(&'a self, id: Uuid, email: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut guard = self.accounts.write().await;
            if guard.values().any(|existing| existing.id != id && existing.email == email) {
                return Err(StoreError::Conflict);
            }
            match guard.get_mut(&id) {
                Some(record) => {
                    record.email = email.to_owned();
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }
}

/// Account persistence with durable-first, volatile-fallback semantics.
#[derive(Clone)]
pub struct AccountStore {
    durable: Option<Arc<dyn AccountBackend>>,
    volatile: Arc<MemoryAccountBackend>,
}

impl AccountStore {
    pub fn volatile_only() -> Self {
        Self { durable: None, volatile: Arc::new(MemoryAccountBackend::default()) }
    }

    pub fn with_durable(durable: Arc<dyn AccountBackend>) -> Self {
        Self { durable: Some(durable), volatile: Arc::new(MemoryAccountBackend::default()) }
    }

    pub async fn insert(&self, record: AccountRecord) -> Result<(), StoreError> {
        if let Some(durable) = &self.durable {
            let result = durable.insert(record.clone()).await;
            if let Some(outcome) = durable_outcome("accounts", "insert", result) {
                return outcome;
            }
        }
        self.volatile.insert(record).await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<AccountRecord>, StoreError> {
        if let Some(durable) = &self.durable {
            let result = durable.find_by_email(email).await;
            if let Some(outcome) = durable_outcome("accounts", "find_by_email", result) {
                return outcome;
            }
        }
        self.volatile.find_by_email(email).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<AccountRecord>, StoreError> {
        if let Some(durable) = &self.durable {
            let result = durable.find_by_id(id).await;
            if let Some(outcome) = durable_outcome("accounts", "find_by_id", result) {
                return outcome;
            }
        }
        self.volatile.find_by_id(id).await
    }

    pub async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<bool, StoreError> {
        if let Some(durable) = &self.durable {
            let result = durable.update_password(id, password_hash).await;
            if let Some(outcome) = durable_outcome("accounts", "update_password", result) {
                return outcome;
            }
        }
        self.volatile.update_password(id, password_hash).await
    }

    pub async fn update_email(&self, id: Uuid, email: &str) -> Result<bool, StoreError> {
        if let Some(durable) = &self.durable {
            let result = durable.update_email(id, email).await;
            if let Some(outcome) = durable_outcome("accounts", "update_email", result) {
                return outcome;
            }
        }
        self.volatile.update_email(id, email).await
    }
}
