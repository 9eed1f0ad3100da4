//! Password login against the account store, plus the account mutations
//! that need the current password or a fresh hash.

use chrono::Utc;
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    auth::password::{constant_time_eq, HashError, PasswordHasher},
    config::BootstrapAdmin,
    store::{
        accounts::{AccountRecord, AccountStore},
        StoreError,
    },
};

/// Fixed identifier of the bootstrap identity. Never stored.
pub const BOOTSTRAP_ACCOUNT_ID: Uuid = Uuid::nil();

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedAccount {
    pub id: Uuid,
    pub email: String,
}

impl From<AccountRecord> for VerifiedAccount {
    fn from(record: AccountRecord) -> Self {
        Self { id: record.id, email: record.email }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("email is already registered")]
    EmailTaken,
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error("account store failed: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for CredentialError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict => Self::EmailTaken,
            other => Self::Store(other),
        }
    }
}

#[derive(Clone)]
pub struct CredentialVerifier {
    accounts: AccountStore,
    hasher: PasswordHasher,
    bootstrap: Option<BootstrapAdmin>,
}

impl CredentialVerifier {
    pub fn new(
        accounts: AccountStore,
        hasher: PasswordHasher,
        bootstrap: Option<BootstrapAdmin>,
    ) -> Self {
        if let Some(admin) = &bootstrap {
            warn!(
                email = %admin.email,
                "bootstrap admin login is ENABLED; disable EMS_DEV_ADMIN_ENABLED outside bootstrapping"
            );
        }
        Self { accounts, hasher, bootstrap }
    }

    /// Returns `None` for an unknown account or a wrong password, whichever
    /// tier answered.
    pub async fn login(&self, email: &str, password: &str) -> Option<VerifiedAccount> {
        match self.accounts.find_by_email(email).await {
            Ok(Some(record)) => {
                let verified = self.hasher.verify(password, &record.password_hash).await;
                return verified.then(|| VerifiedAccount::from(record));
            }
            Ok(None) => {}
            Err(error) => error!(error = %error, "account lookup failed during login"),
        }

        let admin = self.bootstrap.as_ref()?;
        let matches = constant_time_eq(admin.email.as_bytes(), email.as_bytes())
            & constant_time_eq(admin.password.as_bytes(), password.as_bytes());
        if !matches {
            return None;
        }

        warn!(email = %admin.email, "bootstrap admin login accepted");
        Some(VerifiedAccount { id: BOOTSTRAP_ACCOUNT_ID, email: admin.email.clone() })
    }

    pub async fn signup(
        &self,
        email: &str,
        password: &str,
    ) -> Result<VerifiedAccount, CredentialError> {
        let record = AccountRecord {
            id: Uuid::new_v4(),
            email: email.to_owned(),
            password_hash: self.hasher.hash(password).await?,
            created_at: Utc::now(),
        };
        self.accounts.insert(record.clone()).await?;
        Ok(record.into())
    }

    /// Resolves the identity behind a refresh session.
    pub async fn lookup(&self, account_id: Uuid) -> Result<Option<VerifiedAccount>, CredentialError> {
        if account_id == BOOTSTRAP_ACCOUNT_ID {
            return Ok(self
                .bootstrap
                .as_ref()
                .map(|admin| VerifiedAccount { id: account_id, email: admin.email.clone() }));
        }
        Ok(self.accounts.find_by_id(account_id).await?.map(VerifiedAccount::from))
    }

    /// Checks `password` against the stored account without changing it.
    /// False when the account is unknown.
    pub async fn verify_password(
        &self,
        account_id: Uuid,
        password: &str,
    ) -> Result<bool, CredentialError> {
        let Some(record) = self.accounts.find_by_id(account_id).await? else {
            return Ok(false);
        };
        Ok(self.hasher.verify(password, &record.password_hash).await)
    }

    /// Returns false when the account is unknown or `current` is wrong.
    pub async fn change_password(
        &self,
        account_id: Uuid,
        current: &str,
        new: &str,
    ) -> Result<bool, CredentialError> {
        if !self.verify_password(account_id, current).await? {
            return Ok(false);
        }
        let password_hash = self.hasher.hash(new).await?;
        Ok(self.accounts.update_password(account_id, &password_hash).await?)
    }

    /// Returns false when the account is unknown.
    pub async fn update_email(&self, account_id: Uuid, email: &str) -> Result<bool, CredentialError> {
        Ok(self.accounts.update_email(account_id, email).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::{CredentialError, CredentialVerifier, BOOTSTRAP_ACCOUNT_ID};
    use crate::{
        auth::password::PasswordHasher,
        config::BootstrapAdmin,
        store::{
            accounts::{AccountStore, MemoryAccountBackend},
            testing::UnreachableBackend,
        },
    };

    fn verifier(accounts: AccountStore, bootstrap: Option<BootstrapAdmin>) -> CredentialVerifier {
        CredentialVerifier::new(accounts, PasswordHasher::default(), bootstrap)
    }

    fn durable_accounts() -> AccountStore {
        AccountStore::with_durable(Arc::new(MemoryAccountBackend::default()))
    }

    fn bootstrap() -> Option<BootstrapAdmin> {
        Some(BootstrapAdmin { email: "root@x.com".into(), password: "bootstrap1".into() })
    }

    #[tokio::test]
    async fn login_accepts_correct_password() {
        let verifier = verifier(durable_accounts(), None);
        let created = verifier.signup("a@x.com", "secret1").await.expect("signup");

        let account = verifier.login("a@x.com", "secret1").await.expect("login should succeed");
        assert_eq!(account, created);
    }

    #[tokio::test]
    async fn login_rejects_wrong_password_and_unknown_email() {
        let verifier = verifier(durable_accounts(), None);
        verifier.signup("a@x.com", "secret1").await.expect("signup");

        assert!(verifier.login("a@x.com", "secret2").await.is_none());
        assert!(verifier.login("b@x.com", "secret1").await.is_none());
    }

    #[tokio::test]
    async fn login_uses_shadow_registry_when_durable_is_unreachable() {
        let verifier = verifier(AccountStore::with_durable(Arc::new(UnreachableBackend)), None);
        let created = verifier.signup("a@x.com", "secret1").await.expect("signup should fall back");

        assert_eq!(verifier.login("a@x.com", "secret1").await, Some(created));
        assert!(verifier.login("a@x.com", "wrong").await.is_none());
    }

    #[tokio::test]
    async fn bootstrap_identity_is_disabled_by_default() {
        let verifier = verifier(durable_accounts(), None);
        assert!(verifier.login("root@x.com", "bootstrap1").await.is_none());
        assert!(verifier.lookup(BOOTSTRAP_ACCOUNT_ID).await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn bootstrap_identity_logs_in_when_enabled() {
        let verifier = verifier(AccountStore::with_durable(Arc::new(UnreachableBackend)), bootstrap());

        let account = verifier.login("root@x.com", "bootstrap1").await.expect("bootstrap login");
        assert_eq!(account.id, BOOTSTRAP_ACCOUNT_ID);
        assert!(verifier.login("root@x.com", "wrong").await.is_none());

        let resolved = verifier.lookup(BOOTSTRAP_ACCOUNT_ID).await.expect("lookup");
        assert_eq!(resolved.map(|account| account.email), Some("root@x.com".to_owned()));
    }

    #[tokio::test]
    async fn stored_account_takes_precedence_over_bootstrap_identity() {
        let verifier = verifier(durable_accounts(), bootstrap());
        verifier.signup("root@x.com", "stored-password").await.expect("signup");

        assert!(verifier.login("root@x.com", "bootstrap1").await.is_none());
        assert!(verifier.login("root@x.com", "stored-password").await.is_some());
    }

    #[tokio::test]
    async fn signup_rejects_duplicate_email() {
        let verifier = verifier(durable_accounts(), None);
        verifier.signup("a@x.com", "secret1").await.expect("signup");

        let error = verifier.signup("a@x.com", "secret2").await.expect_err("duplicate");
        assert!(matches!(error, CredentialError::EmailTaken));
    }

    #[tokio::test]
    async fn change_password_requires_current_password() {
        let verifier = verifier(AccountStore::with_durable(Arc::new(UnreachableBackend)), None);
        let created = verifier.signup("a@x.com", "secret1").await.expect("signup");

        assert!(!verifier.change_password(created.id, "wrong", "secret2").await.expect("change"));
        assert!(verifier.change_password(created.id, "secret1", "secret2").await.expect("change"));

        assert!(verifier.login("a@x.com", "secret1").await.is_none());
        let account = verifier.login("a@x.com", "secret2").await.expect("new password works");
        assert_eq!(account.id, created.id);
    }

    #[tokio::test]
    async fn verify_password_checks_without_changing_anything() {
        let verifier = verifier(durable_accounts(), None);
        let created = verifier.signup("a@x.com", "secret1").await.expect("signup");

        assert!(verifier.verify_password(created.id, "secret1").await.expect("verify"));
        assert!(!verifier.verify_password(created.id, "wrong").await.expect("verify"));
        assert!(!verifier.verify_password(Uuid::new_v4(), "secret1").await.expect("verify"));
        assert!(verifier.login("a@x.com", "secret1").await.is_some());
    }

    #[tokio::test]
    async fn change_password_for_unknown_account_returns_false() {
        let verifier = verifier(durable_accounts(), None);
        assert!(!verifier.change_password(Uuid::new_v4(), "a", "b").await.expect("change"));
    }

    #[tokio::test]
    async fn update_email_moves_login_to_new_address() {
        let verifier = verifier(durable_accounts(), None);
        let created = verifier.signup("a@x.com", "secret1").await.expect("signup");

        assert!(verifier.update_email(created.id, "new@x.com").await.expect("update"));
        assert!(verifier.login("a@x.com", "secret1").await.is_none());
        assert!(verifier.login("new@x.com", "secret1").await.is_some());
    }
}
