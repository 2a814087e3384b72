//! Runtime configuration, read from the environment at startup.

use crate::time_utils::SchoolClock;
use base64::{engine::general_purpose, Engine as _};
use chrono::Duration;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing the environment variable {0}")]
    MissingVar(String),
    #[error("invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub session_key: Vec<u8>,
    pub session_ttl: Duration,
    pub clock: SchoolClock,
    pub static_dir: PathBuf,
    pub login_rate_limit: usize,
    /// Adds `Secure` to the session cookie.
    pub secure_cookies: bool,
    pub seed_admin: Option<(String, String)>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] over an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()));

        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| {
            let port = lookup("PORT").unwrap_or_else(|| "3000".to_string());
            format!("0.0.0.0:{}", port)
        });

        let database_url = required("DATABASE_URL")?;

        let session_key = general_purpose::STANDARD
            .decode(required("SESSION_KEY")?.trim())
            .map_err(|e| ConfigError::InvalidValue("SESSION_KEY".into(), e.to_string()))?;
        if session_key.len() < 32 {
            return Err(ConfigError::InvalidValue(
                "SESSION_KEY".into(),
                "decoded key must be at least 32 bytes".into(),
            ));
        }

        let session_ttl_hours = parse_or("SESSION_TTL_HOURS", lookup("SESSION_TTL_HOURS"), 12i64)?;
        if session_ttl_hours <= 0 {
            return Err(ConfigError::InvalidValue(
                "SESSION_TTL_HOURS".into(),
                "must be positive".into(),
            ));
        }

        let clock = match lookup("SCHOOL_TIMEZONE") {
            Some(raw) => SchoolClock::parse(&raw).ok_or_else(|| {
                ConfigError::InvalidValue("SCHOOL_TIMEZONE".into(), format!("unknown timezone '{raw}'"))
            })?,
            None => SchoolClock::utc(),
        };

        let seed_admin = match (lookup("SEED_ADMIN_USERNAME"), lookup("SEED_ADMIN_PASSWORD")) {
            (Some(user), Some(pass)) if !user.trim().is_empty() && !pass.is_empty() => {
                Some((user.trim().to_string(), pass))
            }
            _ => None,
        };

        Ok(Self {
            bind_addr,
            database_url,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", lookup("DB_MAX_CONNECTIONS"), 10u32)?,
            session_key,
            session_ttl: Duration::hours(session_ttl_hours),
            clock,
            static_dir: lookup("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("static")),
            login_rate_limit: parse_or("LOGIN_RATE_LIMIT", lookup("LOGIN_RATE_LIMIT"), 5usize)?,
            secure_cookies: parse_or("COOKIE_SECURE", lookup("COOKIE_SECURE"), false)?,
            seed_admin,
        })
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}
