// CORS configuration for the auth server.
//
// The browser client lives on a single configured origin and talks to the
// server with cookies, so credentials are allowed and the CSRF header must
// be accepted on preflight.

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::auth::cookies::CSRF_HEADER;
use crate::error::REQUEST_ID_HEADER;

/// Build a [`CorsLayer`] that admits only `frontend_origin`.
///
/// - Allows credentials (cookies).
/// - Allows GET, POST, PUT, DELETE, OPTIONS.
/// - Allows Content-Type, Authorization, X-Request-Id and X-CSRF-Token.
/// - Exposes X-Request-Id to the browser.
pub fn cors_layer(frontend_origin: &str) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderName::from_static(CSRF_HEADER),
        ])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600));

    match HeaderValue::from_str(frontend_origin.trim_end_matches('/')) {
        Ok(origin) => base.allow_origin(origin),
        Err(_) => {
            warn!(frontend_origin, "frontend origin is not a valid header value; no origin allowed");
            base.allow_origin(AllowOrigin::list(Vec::<HeaderValue>::new()))
        }
    }
}
