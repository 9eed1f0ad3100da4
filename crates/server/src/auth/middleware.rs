use crate::{
    auth::{
        cookies::{read_cookie, ACCESS_COOKIE, CSRF_COOKIE, CSRF_HEADER},
        jwt::{AccessIdentity, JwtAccessTokenService},
        password::constant_time_eq,
    },
    error::{ApiError, ErrorCode},
};
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::warn;

/// Paths reachable before any CSRF token has been issued.
pub const CSRF_EXEMPT_PATHS: [&str; 2] = ["/auth/login", "/auth/signup"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedAdmin {
    pub id: uuid::Uuid,
    pub email: String,
}

pub async fn require_access_token(
    State(jwt_service): State<Arc<JwtAccessTokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request.headers().get(AUTHORIZATION) {
        Some(value) => match value.to_str().ok().and_then(extract_bearer_token) {
            Some(token) => token.to_owned(),
            None => return unauthorized_response("malformed authorization header"),
        },
        None => match read_cookie(request.headers(), ACCESS_COOKIE) {
            Some(token) => token,
            None => return unauthorized_response("missing access token"),
        },
    };

    let AccessIdentity { account_id, email } = match jwt_service.validate_access_token(&token) {
        Ok(identity) => identity,
        Err(_) => return unauthorized_response("invalid access token"),
    };

    request.extensions_mut().insert(AuthenticatedAdmin { id: account_id, email });

    next.run(request).await
}

/// Double-submit check: the `x-csrf-token` header must echo the
/// `XSRF-TOKEN` cookie on every unsafe request.
pub async fn csrf_protection(request: Request, next: Next) -> Response {
    if is_safe_method(request.method()) || CSRF_EXEMPT_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let header = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty());
    let cookie = read_cookie(request.headers(), CSRF_COOKIE);

    let matches = match (header, cookie.as_deref()) {
        (Some(header), Some(cookie)) => constant_time_eq(header.as_bytes(), cookie.as_bytes()),
        _ => false,
    };
    if !matches {
        warn!(method = %request.method(), path = %request.uri().path(), "csrf verification failed");
        return ApiError::from_code(ErrorCode::CsrfMismatch).into_response();
    }

    next.run(request).await
}

fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

fn unauthorized_response(message: &'static str) -> Response {
    ApiError::new(ErrorCode::Unauthorized, message).into_response()
}
