//! Refresh-session lifecycle: create, rotate, verify, revoke, prune.
//!
//! A session moves from active to rotated (its previous secret and CSRF
//! token overwritten) to revoked or expired (deleted). The caller holds
//! `sessionId:rawSecret`; the store holds only `hash(rawSecret)`.

use std::time::Duration as StdDuration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    auth::password::{constant_time_eq, HashError, PasswordHasher},
    store::{
        sessions::{PruneReport, SessionRecord, SessionRotation, SessionStore},
        StoreError,
    },
};

pub const SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const REFRESH_SECRET_BYTES: usize = 32;
const CSRF_TOKEN_BYTES: usize = 16;

/// Credentials handed to the caller when a session is created.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session_id: Uuid,
    /// `sessionId:rawSecret`, the value of the refresh cookie.
    pub refresh_token: String,
    pub csrf_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Credentials handed to the caller after a rotation.
#[derive(Debug, Clone)]
pub struct RotatedSession {
    pub refresh_token: String,
    pub csrf_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshGrant {
    pub account_id: Uuid,
    pub session_id: Uuid,
}

/// Why a refresh credential was refused. Never causes the session to be
/// deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshRejection {
    Malformed,
    NotFound,
    Expired,
    SecretMismatch,
    CsrfMismatch,
    /// A concurrent refresh rotated the session first.
    Superseded,
    StoreFailure,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error("session store failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub enum RefreshOutcome {
    Rotated { grant: RefreshGrant, session: RotatedSession },
    Rejected(RefreshRejection),
}

#[derive(Clone)]
pub struct SessionManager {
    store: SessionStore,
    hasher: PasswordHasher,
}

impl SessionManager {
    pub fn new(store: SessionStore, hasher: PasswordHasher) -> Self {
        Self { store, hasher }
    }

    pub async fn create_session(&self, account_id: Uuid) -> Result<IssuedSession, SessionError> {
        let session_id = Uuid::new_v4();
        let secret = SecretTriple::generate(&self.hasher).await?;

        self.store
            .put(SessionRecord {
                id: session_id,
                account_id,
                refresh_hash: secret.refresh_hash,
                csrf_token: secret.csrf_token.clone(),
                expires_at: secret.expires_at,
            })
            .await?;

        debug!(%session_id, %account_id, "refresh session created");

        Ok(IssuedSession {
            session_id,
            refresh_token: refresh_token(session_id, &secret.raw_secret),
            csrf_token: secret.csrf_token,
            expires_at: secret.expires_at,
        })
    }

    /// Replaces the secret, CSRF token and expiry unconditionally.
    ///
    /// Does not check the presented secret; callers verify first.
    pub async fn rotate_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<RotatedSession>, SessionError> {
        self.rotate(session_id, None).await
    }

    async fn rotate(
        &self,
        session_id: Uuid,
        expected_refresh_hash: Option<String>,
    ) -> Result<Option<RotatedSession>, SessionError> {
        let secret = SecretTriple::generate(&self.hasher).await?;
        let rotation = SessionRotation {
            refresh_hash: secret.refresh_hash,
            csrf_token: secret.csrf_token.clone(),
            expires_at: secret.expires_at,
            expected_refresh_hash,
        };

        if !self.store.update(session_id, rotation).await? {
            return Ok(None);
        }

        debug!(%session_id, "refresh session rotated");

        Ok(Some(RotatedSession {
            refresh_token: refresh_token(session_id, &secret.raw_secret),
            csrf_token: secret.csrf_token,
            expires_at: secret.expires_at,
        }))
    }

    pub async fn verify_refresh_cookie(
        &self,
        cookie_value: &str,
        csrf_header: Option<&str>,
    ) -> Option<RefreshGrant> {
        self.check_refresh_cookie(cookie_value, csrf_header).await.ok()
    }

    pub async fn check_refresh_cookie(
        &self,
        cookie_value: &str,
        csrf_header: Option<&str>,
    ) -> Result<RefreshGrant, RefreshRejection> {
        self.verified_record(cookie_value, csrf_header).await.map(|record| RefreshGrant {
            account_id: record.account_id,
            session_id: record.id,
        })
    }

    async fn verified_record(
        &self,
        cookie_value: &str,
        csrf_header: Option<&str>,
    ) -> Result<SessionRecord, RefreshRejection> {
        let (session_id, raw_secret) =
            parse_refresh_token(cookie_value).ok_or(RefreshRejection::Malformed)?;

        let record = self
            .store
            .get(session_id)
            .await
            .map_err(|error| {
                error!(%session_id, error = %error, "refresh session lookup failed");
                RefreshRejection::StoreFailure
            })?
            .ok_or(RefreshRejection::NotFound)?;

        if record.expires_at < Utc::now() {
            return Err(RefreshRejection::Expired);
        }

        if !self.hasher.verify(raw_secret, &record.refresh_hash).await {
            return Err(RefreshRejection::SecretMismatch);
        }

        if let Some(header) = csrf_header {
            if !constant_time_eq(header.as_bytes(), record.csrf_token.as_bytes()) {
                return Err(RefreshRejection::CsrfMismatch);
            }
        }

        Ok(record)
    }

    /// Verify-then-rotate. The rotation only applies if the session still
    /// holds the hash that was just verified.
    pub async fn refresh(
        &self,
        cookie_value: &str,
        csrf_header: Option<&str>,
    ) -> Result<RefreshOutcome, SessionError> {
        let record = match self.verified_record(cookie_value, csrf_header).await {
            Ok(record) => record,
            Err(rejection) => return Ok(RefreshOutcome::Rejected(rejection)),
        };

        let grant = RefreshGrant { account_id: record.account_id, session_id: record.id };
        match self.rotate(record.id, Some(record.refresh_hash)).await? {
            Some(session) => Ok(RefreshOutcome::Rotated { grant, session }),
            None => Ok(RefreshOutcome::Rejected(RefreshRejection::Superseded)),
        }
    }

    /// Idempotent: returns false when the session was already gone.
    pub async fn revoke_session(&self, session_id: Uuid) -> bool {
        match self.store.delete(session_id).await {
            Ok(deleted) => deleted,
            Err(error) => {
                error!(%session_id, error = %error, "failed to revoke refresh session");
                false
            }
        }
    }

    pub async fn prune_expired_sessions(&self) -> PruneReport {
        let report = self.store.delete_expired_before(Utc::now()).await;
        let removed = report.durable.unwrap_or(0) + report.volatile;
        if removed > 0 {
            info!(
                durable = ?report.durable,
                volatile = report.volatile,
                "pruned expired refresh sessions"
            );
        }
        report
    }

    /// Runs [`Self::prune_expired_sessions`] every `period`, first after one
    /// full period. Missed ticks are skipped.
    pub fn spawn_prune_task(&self, period: StdDuration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                manager.prune_expired_sessions().await;
            }
        })
    }
}

struct SecretTriple {
    raw_secret: String,
    refresh_hash: String,
    csrf_token: String,
    expires_at: DateTime<Utc>,
}

impl SecretTriple {
    async fn generate(hasher: &PasswordHasher) -> Result<Self, HashError> {
        let raw_secret = random_token(REFRESH_SECRET_BYTES);
        let refresh_hash = hasher.hash(&raw_secret).await?;
        Ok(Self {
            raw_secret,
            refresh_hash,
            csrf_token: random_token(CSRF_TOKEN_BYTES),
            expires_at: Utc::now() + Duration::seconds(SESSION_TTL_SECONDS),
        })
    }
}

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn refresh_token(session_id: Uuid, raw_secret: &str) -> String {
    format!("{session_id}:{raw_secret}")
}

/// Splits `sessionId:rawSecret`; the session id must be a UUID.
pub fn parse_refresh_token(value: &str) -> Option<(Uuid, &str)> {
    let (session_id, raw_secret) = value.split_once(':')?;
    if raw_secret.is_empty() {
        return None;
    }
    let session_id = Uuid::parse_str(session_id).ok()?;
    Some((session_id, raw_secret))
}
