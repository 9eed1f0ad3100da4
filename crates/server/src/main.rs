mod api;
mod auth;
mod config;
mod cors;
mod db;
mod error;
mod session;
mod store;

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::{sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    api::AppState,
    auth::{
        cookies::CookiePolicy, credentials::CredentialVerifier, jwt::JwtAccessTokenService,
        password::PasswordHasher,
    },
    config::ServerConfig,
    db::{
        migrations::run_migrations,
        pool::{check_pool_health, create_pg_pool, PoolConfig},
    },
    error::{
        attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
        ApiError, ErrorCode,
    },
    session::manager::SessionManager,
    store::{
        accounts::{AccountStore, PgAccountBackend},
        sessions::{PgSessionBackend, SessionStore},
    },
};

const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    init_tracing(&config.log_filter, config.production);

    config.check_production().context("refusing to start with an unsafe production config")?;
    if config.is_dev_jwt_secret() {
        warn!("EMS_JWT_SECRET is not set; using the development secret");
    }
    if config.bootstrap_admin_incomplete() {
        warn!(
            "EMS_DEV_ADMIN_ENABLED is set but EMS_DEV_ADMIN_EMAIL or EMS_DEV_ADMIN_PASSWORD is \
             missing; bootstrap admin stays disabled"
        );
    }

    let jwt_service = Arc::new(
        JwtAccessTokenService::new(&config.jwt_secret).context("invalid EMS_JWT_SECRET")?,
    );
    let (accounts, sessions) = build_stores(&config).await?;

    let hasher = PasswordHasher::default();
    let session_manager = SessionManager::new(sessions, hasher.clone());
    let prune_task = session_manager.spawn_prune_task(config.prune_interval);

    let state = AppState {
        credentials: CredentialVerifier::new(accounts, hasher, config.bootstrap_admin.clone()),
        sessions: session_manager,
        jwt_service,
        cookie_policy: CookiePolicy::for_environment(config.production),
    };
    let app = build_router(api::router(state), &config.frontend_origin);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind auth server listener on {}", config.listen_addr))?;

    info!(
        listen_addr = %config.listen_addr,
        production = config.production,
        prune_interval_secs = config.prune_interval.as_secs(),
        "starting auth server"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("auth server exited unexpectedly");
    prune_task.abort();
    served
}

fn init_tracing(filter: &str, json: bool) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Durable stores when a database is configured, volatile-only otherwise.
///
/// An unreachable database is not fatal: the pool is lazy and every store
/// operation falls back until it comes back.
async fn build_stores(config: &ServerConfig) -> anyhow::Result<(AccountStore, SessionStore)> {
    let Some(database_url) = config.database_url.as_deref() else {
        warn!("EMS_DATABASE_URL is not set; accounts and sessions will not survive a restart");
        return Ok((AccountStore::volatile_only(), SessionStore::volatile_only()));
    };

    let pool = create_pg_pool(database_url, PoolConfig::from_env(config.production))
        .context("failed to configure PostgreSQL pool")?;

    match check_pool_health(&pool).await {
        Ok(()) => {
            if let Err(error) = run_migrations(&pool).await {
                error!(error = ?error, "database migrations failed; continuing with fallback");
            }
        }
        Err(error) => {
            warn!(error = %error, "database unreachable at startup; serving from volatile tier")
        }
    }

    Ok((
        AccountStore::with_durable(Arc::new(PgAccountBackend::new(pool.clone()))),
        SessionStore::with_durable(Arc::new(PgSessionBackend::new(pool))),
    ))
}

fn build_router(api_router: Router, frontend_origin: &str) -> Router {
    apply_middleware(Router::new().route("/healthz", get(healthz)).merge(api_router))
        .layer(cors::cors_layer(frontend_origin))
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            ApiError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
