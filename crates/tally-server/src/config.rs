use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// JWT secrets from sample env files that must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub reader_pool_size: usize,
    pub busy_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let jwt_secret = get("TALLY_JWT_SECRET")
            .ok_or_else(|| ConfigError::MissingEnvVar("TALLY_JWT_SECRET".into()))?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            return Err(ConfigError::InvalidValue {
                name: "TALLY_JWT_SECRET".into(),
                message: "still set to a placeholder".into(),
            });
        }

        let reader_pool_size = parse_or(get("TALLY_READER_POOL"), "TALLY_READER_POOL", 4usize)?;
        if reader_pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "TALLY_READER_POOL".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            host: get("TALLY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(get("TALLY_PORT"), "TALLY_PORT", 4000)?,
            db_path: get("TALLY_DB_PATH").unwrap_or_else(|| "tally.db".into()).into(),
            jwt_secret,
            reader_pool_size,
            busy_timeout: Duration::from_millis(parse_or(
                get("TALLY_BUSY_TIMEOUT_MS"),
                "TALLY_BUSY_TIMEOUT_MS",
                2000,
            )?),
        })
    }
}

fn parse_or<T>(raw: Option<String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            name: name.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}
