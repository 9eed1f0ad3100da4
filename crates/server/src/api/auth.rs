use axum::{
    extract::{Extension, Json, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::AppState;
use crate::{
    auth::{
        cookies::{read_cookie, CSRF_HEADER, REFRESH_COOKIE},
        credentials::{CredentialError, VerifiedAccount},
        middleware::AuthenticatedAdmin,
    },
    error::{ApiError, ErrorCode},
    session::manager::{parse_refresh_token, RefreshOutcome, RefreshRejection},
};

const MIN_PASSWORD_CHARS: usize = 6;

#[derive(Deserialize)]
pub(crate) struct CredentialsRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateProfileRequest {
    email: Option<String>,
    current_password: Option<String>,
    new_password: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct AdminView {
    pub(crate) id: Uuid,
    pub(crate) email: String,
    pub(crate) is_admin: bool,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct AdminEnvelope {
    pub(crate) admin: AdminView,
}

impl AdminEnvelope {
    fn new(id: Uuid, email: String) -> Json<Self> {
        Json(Self { admin: AdminView { id, email, is_admin: true } })
    }
}

pub(crate) async fn login(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<Response, ApiError> {
    validate_email(&payload.email)?;
    validate_password(&payload.password, "password")?;

    let account = state
        .credentials
        .login(&payload.email, &payload.password)
        .await
        .ok_or_else(|| ApiError::from_code(ErrorCode::InvalidCredentials))?;

    info!(account_id = %account.id, "admin logged in");
    start_session(&state, StatusCode::OK, account).await
}

pub(crate) async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<Response, ApiError> {
    validate_email(&payload.email)?;
    validate_password(&payload.password, "password")?;

    let account =
        state.credentials.signup(&payload.email, &payload.password).await.map_err(|error| {
            match error {
                CredentialError::EmailTaken => {
                    ApiError::new(ErrorCode::Conflict, "email is already registered")
                }
                other => ApiError::internal(other),
            }
        })?;

    info!(account_id = %account.id, "admin account created");
    start_session(&state, StatusCode::CREATED, account).await
}

pub(crate) async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let cookie = read_cookie(&headers, REFRESH_COOKIE)
        .ok_or_else(|| ApiError::new(ErrorCode::SessionNotFound, "missing refresh token"))?;
    let csrf_header = headers.get(CSRF_HEADER).and_then(|value| value.to_str().ok());

    let (grant, session) =
        match state.sessions.refresh(&cookie, csrf_header).await.map_err(ApiError::internal)? {
            RefreshOutcome::Rotated { grant, session } => (grant, session),
            RefreshOutcome::Rejected(rejection) => {
                warn!(?rejection, "refresh rejected");
                return Err(rejection_error(rejection));
            }
        };

    let account = state
        .credentials
        .lookup(grant.account_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::SessionNotFound, "account no longer exists"))?;

    let access_token = state
        .jwt_service
        .issue_access_token(account.id, &account.email)
        .map_err(ApiError::internal)?;
    let cookies = session_cookies(&state, &access_token, &session.refresh_token, &session.csrf_token)?;

    Ok((AppendHeaders(cookies), AdminEnvelope::new(account.id, account.email)).into_response())
}

pub(crate) async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if let Some(cookie) = read_cookie(&headers, REFRESH_COOKIE) {
        if let Some((session_id, _)) = parse_refresh_token(&cookie) {
            state.sessions.revoke_session(session_id).await;
        }
    }

    let cleared = state.cookie_policy.clear_cookies().map_err(ApiError::internal)?;
    let cookies = cleared.map(|value| (SET_COOKIE, value));

    Ok((AppendHeaders(cookies), Json(json!({ "ok": true }))).into_response())
}

pub(crate) async fn me(Extension(admin): Extension<AuthenticatedAdmin>) -> Json<AdminEnvelope> {
    AdminEnvelope::new(admin.id, admin.email)
}

pub(crate) async fn update_profile(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthenticatedAdmin>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Response, ApiError> {
    let email = payload.email.filter(|email| !email.is_empty());
    let password_change = match (payload.current_password, payload.new_password) {
        (Some(current), Some(new)) => Some((current, new)),
        (None, Some(_)) => {
            return Err(ApiError::new(
                ErrorCode::ValidationFailed,
                "current password is required to set a new password",
            )
            .with_details(json!({ "field": "currentPassword" })))
        }
        _ => None,
    };
    if email.is_none() && password_change.is_none() {
        return Err(ApiError::new(
            ErrorCode::ValidationFailed,
            "provide a new email or both current and new password",
        ));
    }

    let email = email.filter(|email| *email != admin.email);
    if let Some(email) = &email {
        validate_email(email)?;
    }
    if let Some((current, new)) = &password_change {
        validate_password(new, "newPassword")?;
        let verified = state
            .credentials
            .verify_password(admin.id, current)
            .await
            .map_err(ApiError::internal)?;
        if !verified {
            return Err(current_password_error());
        }
    }

    let mut next_email = admin.email.clone();
    if let Some(email) = email {
        let updated =
            state.credentials.update_email(admin.id, &email).await.map_err(|error| match error {
                CredentialError::EmailTaken => {
                    ApiError::new(ErrorCode::Conflict, "email is already registered")
                }
                other => ApiError::internal(other),
            })?;
        if !updated {
            return Err(ApiError::new(ErrorCode::NotFound, "account not found"));
        }
        next_email = email;
    }

    if let Some((current, new)) = password_change {
        let changed = state
            .credentials
            .change_password(admin.id, &current, &new)
            .await
            .map_err(ApiError::internal)?;
        if !changed {
            return Err(current_password_error());
        }
    }

    let access_token = state
        .jwt_service
        .issue_access_token(admin.id, &next_email)
        .map_err(ApiError::internal)?;
    let access_cookie =
        state.cookie_policy.access_cookie(&access_token).map_err(ApiError::internal)?;

    Ok((AppendHeaders([(SET_COOKIE, access_cookie)]), AdminEnvelope::new(admin.id, next_email))
        .into_response())
}

pub(crate) async fn change_password(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthenticatedAdmin>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_password(&payload.new_password, "newPassword")?;

    let changed = state
        .credentials
        .change_password(admin.id, &payload.current_password, &payload.new_password)
        .await
        .map_err(ApiError::internal)?;
    if !changed {
        return Err(ApiError::new(
            ErrorCode::ValidationFailed,
            "invalid current password or could not change",
        ));
    }

    info!(account_id = %admin.id, "admin password changed");
    Ok(Json(json!({ "ok": true })))
}

async fn start_session(
    state: &AppState,
    status: StatusCode,
    account: VerifiedAccount,
) -> Result<Response, ApiError> {
    let session = state.sessions.create_session(account.id).await.map_err(ApiError::internal)?;
    let access_token = state
        .jwt_service
        .issue_access_token(account.id, &account.email)
        .map_err(ApiError::internal)?;
    let cookies = session_cookies(state, &access_token, &session.refresh_token, &session.csrf_token)?;

    Ok((status, AppendHeaders(cookies), AdminEnvelope::new(account.id, account.email))
        .into_response())
}

fn session_cookies(
    state: &AppState,
    access_token: &str,
    refresh_token: &str,
    csrf_token: &str,
) -> Result<[(axum::http::HeaderName, HeaderValue); 3], ApiError> {
    let policy = &state.cookie_policy;
    Ok([
        (SET_COOKIE, policy.access_cookie(access_token).map_err(ApiError::internal)?),
        (SET_COOKIE, policy.refresh_cookie(refresh_token).map_err(ApiError::internal)?),
        (SET_COOKIE, policy.csrf_cookie(csrf_token).map_err(ApiError::internal)?),
    ])
}

fn current_password_error() -> ApiError {
    ApiError::new(ErrorCode::ValidationFailed, "current password is incorrect")
        .with_details(json!({ "field": "currentPassword" }))
}

fn rejection_error(rejection: RefreshRejection) -> ApiError {
    match rejection {
        RefreshRejection::Expired => ApiError::from_code(ErrorCode::SessionExpired),
        RefreshRejection::CsrfMismatch => ApiError::from_code(ErrorCode::CsrfMismatch),
        RefreshRejection::StoreFailure => ApiError::from_code(ErrorCode::InternalError),
        RefreshRejection::Malformed
        | RefreshRejection::NotFound
        | RefreshRejection::SecretMismatch
        | RefreshRejection::Superseded => ApiError::from_code(ErrorCode::SessionNotFound),
    }
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    let valid = !email.chars().any(char::is_whitespace)
        && email.split_once('@').is_some_and(|(local, domain)| {
            !local.is_empty()
                && !domain.contains('@')
                && domain.split('.').filter(|label| !label.is_empty()).count() >= 2
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        });
    if !valid {
        return Err(ApiError::new(ErrorCode::ValidationFailed, "email must be a valid address")
            .with_details(json!({ "field": "email" })));
    }

    Ok(())
}

fn validate_password(password: &str, field: &'static str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(ApiError::new(
            ErrorCode::ValidationFailed,
            format!("password must be at least {MIN_PASSWORD_CHARS} characters"),
        )
        .with_details(json!({ "field": field, "min_length": MIN_PASSWORD_CHARS })));
    }

    Ok(())
}
