// Auth server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The database pool reads its own tuning variables in
// `db::pool`; everything else the server needs is collected here.

use std::{net::SocketAddr, time::Duration};

use anyhow::bail;
use url::Url;

const DEV_JWT_SECRET: &str = "ems_local_development_jwt_secret_must_be_32_chars";
const DEFAULT_FRONTEND_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 60 * 60;

/// Statically configured login used only for bootstrapping a deployment
/// whose account store is empty or unreachable.
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// HMAC secret for access tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string. `None` runs the stores volatile-only.
    pub database_url: Option<String>,
    /// Selects the production cookie policy and startup checks.
    pub production: bool,
    /// Browser origin allowed by CORS.
    pub frontend_origin: String,
    /// Abort startup when production runs behind a non-https origin.
    pub enforce_https: bool,
    /// Degraded-mode login, disabled unless explicitly enabled.
    pub bootstrap_admin: Option<BootstrapAdmin>,
    /// `EMS_DEV_ADMIN_ENABLED` was set, whether or not it took effect.
    pub bootstrap_admin_requested: bool,
    /// Period of the expired-session sweep.
    pub prune_interval: Duration,
    /// Log filter directive (e.g. `info`, `ems_auth=debug`).
    pub log_filter: String,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `EMS_HOST` | `0.0.0.0` |
    /// | `EMS_PORT` | `4000` |
    /// | `EMS_JWT_SECRET` | dev-only placeholder |
    /// | `EMS_DATABASE_URL` | *(none)* |
    /// | `EMS_PRODUCTION` | `false` |
    /// | `EMS_FRONTEND_ORIGIN` | `http://localhost:3000` |
    /// | `EMS_ENFORCE_HTTPS` | `false` |
    /// | `EMS_DEV_ADMIN_ENABLED` | `false` |
    /// | `EMS_DEV_ADMIN_EMAIL` / `EMS_DEV_ADMIN_PASSWORD` | *(none)* |
    /// | `EMS_SESSION_PRUNE_INTERVAL_SECS` | `3600` |
    /// | `EMS_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let flag = |key: &str| {
            env(key).map(|value| matches!(value.trim(), "true" | "1")).unwrap_or(false)
        };

        let host = env("EMS_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("EMS_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(4000);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("EMS_JWT_SECRET")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEV_JWT_SECRET.into());

        let database_url = env("EMS_DATABASE_URL").ok().filter(|value| !value.trim().is_empty());

        let frontend_origin =
            env("EMS_FRONTEND_ORIGIN").unwrap_or_else(|_| DEFAULT_FRONTEND_ORIGIN.into());

        let bootstrap_admin_requested = flag("EMS_DEV_ADMIN_ENABLED");
        let bootstrap_admin = if bootstrap_admin_requested {
            match (env("EMS_DEV_ADMIN_EMAIL"), env("EMS_DEV_ADMIN_PASSWORD")) {
                (Ok(email), Ok(password)) if !email.is_empty() && !password.is_empty() => {
                    Some(BootstrapAdmin { email, password })
                }
                _ => None,
            }
        } else {
            None
        };

        let prune_interval_secs = env("EMS_SESSION_PRUNE_INTERVAL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_PRUNE_INTERVAL_SECS);

        let log_filter = env("EMS_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self {
            listen_addr,
            jwt_secret,
            database_url,
            production: flag("EMS_PRODUCTION"),
            frontend_origin,
            enforce_https: flag("EMS_ENFORCE_HTTPS"),
            bootstrap_admin,
            bootstrap_admin_requested,
            prune_interval: Duration::from_secs(prune_interval_secs),
            log_filter,
        }
    }

    /// The bootstrap admin was requested without both credentials.
    pub fn bootstrap_admin_incomplete(&self) -> bool {
        self.bootstrap_admin_requested && self.bootstrap_admin.is_none()
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }

    /// Startup checks for production deployments.
    ///
    /// A non-https frontend origin only logs unless `EMS_ENFORCE_HTTPS` is
    /// set, since TLS may terminate at a proxy the server cannot see.
    pub fn check_production(&self) -> anyhow::Result<()> {
        if !self.production {
            return Ok(());
        }

        if self.is_dev_jwt_secret() {
            bail!("EMS_JWT_SECRET must be set in production");
        }

        let https = Url::parse(&self.frontend_origin)
            .map(|origin| origin.scheme() == "https")
            .unwrap_or(false);
        if !https {
            tracing::error!(
                frontend_origin = %self.frontend_origin,
                "EMS_FRONTEND_ORIGIN does not use https; secure cookies will not be sent"
            );
            if self.enforce_https {
                bail!("EMS_ENFORCE_HTTPS is enabled and EMS_FRONTEND_ORIGIN is not https");
            }
        }

        Ok(())
    }
}
