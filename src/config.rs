use std::{env, str::FromStr, time::Duration};

use thiserror::Error;

use crate::validation::Locale;

/// AppConfig
///
/// Holds the application's entire configuration state, read once at startup and
/// shared read-only through the application state via `FromRef`.
#[derive(Clone)]
pub struct AppConfig {
    // Runtime environment marker. Controls log format and which secrets are mandatory.
    pub env: Env,
    // Postgres connection string. `None` selects the in-memory store (local only).
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout: Duration,
    pub db_max_lifetime: Duration,
    // HS256 signing secret for access and refresh tokens.
    pub jwt_secret: String,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl: chrono::Duration,
    // Reserved superuser and root role maintained by the bootstrap routine.
    pub admin_username: String,
    pub admin_password: String,
    pub root_role: String,
    pub bootstrap_interval: Duration,
    // Language of default validation messages.
    pub locale: Locale,
    // Upper bound on the handling time of a single request.
    pub request_timeout: Duration,
    pub bind_addr: String,
}

/// Env
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Env {
    Local,
    Production,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set in production")]
    Missing(&'static str),
    #[error("{key} has an invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("JWT_SECRET must be at least {MIN_SECRET_LEN} bytes in production")]
    WeakSecret,
}

const MIN_SECRET_LEN: usize = 32;
const LOCAL_JWT_SECRET: &str = "local-development-secret-not-for-production";

impl Default for AppConfig {
    /// default
    ///
    /// Safe values for tests: local env, in-memory store, short bootstrap interval.
    fn default() -> Self {
        Self {
            env: Env::Local,
            database_url: None,
            db_max_connections: 10,
            db_min_connections: 1,
            db_acquire_timeout: Duration::from_secs(5),
            db_max_lifetime: Duration::from_secs(30 * 60),
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            access_token_ttl: chrono::Duration::minutes(120),
            refresh_token_ttl: chrono::Duration::days(7),
            admin_username: "admin".to_string(),
            admin_password: "admin-password".to_string(),
            root_role: "root".to_string(),
            bootstrap_interval: Duration::from_secs(300),
            locale: Locale::En,
            request_timeout: Duration::from_secs(30),
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from environment variables (call `dotenv` first).
    /// Fails fast when a production secret is missing or a value does not parse.
    pub fn load() -> Result<Self, ConfigError> {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };
        let defaults = Self::default();

        let jwt_secret = match (env, var("JWT_SECRET")) {
            (Env::Production, None) => return Err(ConfigError::Missing("JWT_SECRET")),
            (Env::Production, Some(s)) if s.len() < MIN_SECRET_LEN => {
                return Err(ConfigError::WeakSecret);
            }
            (_, Some(s)) => s,
            (Env::Local, None) => defaults.jwt_secret,
        };

        let database_url = var("DATABASE_URL");
        if env == Env::Production && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let admin_password = match (env, var("ADMIN_PASSWORD")) {
            (Env::Production, None) => return Err(ConfigError::Missing("ADMIN_PASSWORD")),
            (_, Some(p)) => p,
            (Env::Local, None) => defaults.admin_password,
        };

        let locale = match var("APP_LOCALE") {
            Some(raw) => Locale::parse(&raw).ok_or(ConfigError::Invalid {
                key: "APP_LOCALE",
                value: raw,
            })?,
            None => defaults.locale,
        };

        Ok(Self {
            env,
            database_url,
            db_max_connections: parsed("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            db_min_connections: parsed("DB_MIN_CONNECTIONS", defaults.db_min_connections)?,
            db_acquire_timeout: secs("DB_ACQUIRE_TIMEOUT_SECS", defaults.db_acquire_timeout)?,
            db_max_lifetime: secs("DB_MAX_LIFETIME_SECS", defaults.db_max_lifetime)?,
            jwt_secret,
            access_token_ttl: chrono::Duration::minutes(parsed("ACCESS_TOKEN_MINUTES", 120)?),
            refresh_token_ttl: chrono::Duration::days(parsed("REFRESH_TOKEN_DAYS", 7)?),
            admin_username: var("ADMIN_USERNAME").unwrap_or(defaults.admin_username),
            admin_password,
            root_role: var("ROOT_ROLE").unwrap_or(defaults.root_role),
            bootstrap_interval: secs("BOOTSTRAP_INTERVAL_SECS", defaults.bootstrap_interval)?,
            locale,
            request_timeout: secs("REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            bind_addr: var("BIND_ADDR").unwrap_or(defaults.bind_addr),
        })
    }
}

/// A set, non-blank environment variable.
fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn secs(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let value: u64 = parsed(key, default.as_secs())?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        });
    }
    Ok(Duration::from_secs(value))
}
