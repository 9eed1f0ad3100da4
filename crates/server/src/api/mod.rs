pub mod auth;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::auth::{
    cookies::CookiePolicy,
    credentials::CredentialVerifier,
    jwt::JwtAccessTokenService,
    middleware::{csrf_protection, require_access_token},
};
use crate::session::manager::SessionManager;

#[derive(Clone)]
pub struct AppState {
    pub credentials: CredentialVerifier,
    pub sessions: SessionManager,
    pub jwt_service: Arc<JwtAccessTokenService>,
    pub cookie_policy: CookiePolicy,
}

pub fn router(state: AppState) -> Router {
    let access_layer =
        middleware::from_fn_with_state(Arc::clone(&state.jwt_service), require_access_token);

    let protected = Router::new()
        .route("/auth/me", get(auth::me).put(auth::update_profile))
        .route("/auth/change-password", post(auth::change_password))
        .route_layer(access_layer);

    Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/signup", post(auth::signup))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .merge(protected)
        .with_state(state)
        .layer(middleware::from_fn(csrf_protection))
}
