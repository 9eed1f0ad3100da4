//! Short-lived HS256 access tokens.
//!
//! The token body is the identity itself (`sub` is the account id) plus
//! `iat`/`exp`, so a verified token deserializes straight into an
//! [`AccessIdentity`].

use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const MIN_SECRET_CHARS: usize = 32;

/// Identity carried by a verified access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessIdentity {
    #[serde(rename = "sub")]
    pub account_id: Uuid,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessTokenClaims {
    #[serde(flatten)]
    identity: AccessIdentity,
    iat: i64,
    exp: i64,
}

impl AccessTokenClaims {
    fn issued_at(identity: AccessIdentity, issued_at: i64) -> Self {
        Self { identity, iat: issued_at, exp: issued_at + ACCESS_TOKEN_TTL_SECONDS }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid access token")]
pub struct InvalidToken(#[source] jsonwebtoken::errors::Error);

/// Signs and verifies access tokens with one shared secret.
#[derive(Clone)]
pub struct JwtAccessTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAccessTokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < MIN_SECRET_CHARS {
            bail!("jwt secret must be at least {MIN_SECRET_CHARS} characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_access_token(&self, account_id: Uuid, email: &str) -> anyhow::Result<String> {
        let identity = AccessIdentity { account_id, email: email.to_owned() };
        self.sign(&AccessTokenClaims::issued_at(identity, current_unix_timestamp()?))
    }

    fn sign(&self, claims: &AccessTokenClaims) -> anyhow::Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .context("failed to encode access token")
    }

    /// Rejects bad signatures, expired tokens and subjects that are not
    /// account ids.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessIdentity, InvalidToken> {
        decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims.identity)
            .map_err(InvalidToken)
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}
