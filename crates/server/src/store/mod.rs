//! Dual-tier persistence for accounts and refresh sessions.
//!
//! Each store composes a durable PostgreSQL backend with a volatile
//! in-process backend. Every operation goes to the durable backend first;
//! when it reports [`StoreError::Unavailable`] the same operation is served
//! by the volatile backend instead. Volatile records do not survive a
//! restart and are never reconciled into the durable tier.

pub mod accounts;
pub mod sessions;

use std::{future::Future, pin::Pin};

use tracing::warn;

/// Boxed future returned by backend trait methods (object-safe for `dyn`).
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Connectivity loss, missing schema, pool timeout. Recovered by fallback.
    #[error("durable store unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),
    /// Unique constraint violation.
    #[error("record conflicts with an existing record")]
    Conflict,
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(database_error) = &error {
            if database_error.code().as_deref() == Some("23505") {
                return Self::Conflict;
            }
        }
        Self::Unavailable(error)
    }
}

/// Returns `None` when the durable result should be retried on the volatile
/// tier, otherwise the durable result itself.
fn durable_outcome<T>(
    store: &'static str,
    operation: &'static str,
    result: Result<T, StoreError>,
) -> Option<Result<T, StoreError>> {
    match result {
        Err(StoreError::Unavailable(error)) => {
            warn!(store, operation, error = %error, "durable store unavailable; using volatile tier");
            None
        }
        other => Some(other),
    }
}
