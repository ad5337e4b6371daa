//! Runtime configuration, read from the environment.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use stockkeep_observability::LogFormat;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraConfig {
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Upper bound for a whole `confirm` call.
    pub confirm_timeout: Duration,
    /// Upper bound for a single row-lock wait.
    pub lock_timeout: Duration,
    pub log_format: LogFormat,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            log_format: LogFormat::default(),
        }
    }
}

impl InfraConfig {
    /// Read `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`, `CONFIRM_TIMEOUT_MS`,
    /// `LOCK_TIMEOUT_MS` and `LOG_FORMAT`. Malformed values fall back to the
    /// defaults with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let log_format = match lookup("LOG_FORMAT") {
            Some(raw) => LogFormat::parse(&raw).unwrap_or_else(|| {
                warn!(key = "LOG_FORMAT", value = %raw, "invalid value; using default");
                defaults.log_format
            }),
            None => defaults.log_format,
        };

        Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", defaults.max_connections),
            confirm_timeout: Duration::from_millis(parse_or(
                &lookup,
                "CONFIRM_TIMEOUT_MS",
                defaults.confirm_timeout.as_millis() as u64,
            )),
            lock_timeout: Duration::from_millis(parse_or(
                &lookup,
                "LOCK_TIMEOUT_MS",
                defaults.lock_timeout.as_millis() as u64,
            )),
            log_format,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, fallback = %default, "invalid value; using default");
            default
        }),
        None => default,
    }
}
