use std::{fmt::Display, net::SocketAddr, str::FromStr, time::Duration};

use anyhow::Context;

use crate::session::DEFAULT_HISTORY_LIMIT;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://murmur.db";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8005";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub history_limit: u32,
    pub db_max_connections: u32,
    pub db_timeout: Duration,
    pub broadcast_capacity: usize,
}

impl Config {
    /// Reads the configuration from the environment, loading `.env` first if present.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned()),
            bind_addr: parsed(&lookup, "BIND_ADDR", DEFAULT_BIND_ADDR)?,
            history_limit: parsed(&lookup, "HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)?,
            db_max_connections: parsed(&lookup, "DB_MAX_CONNECTIONS", 16)?,
            db_timeout: Duration::from_secs(parsed(&lookup, "DB_TIMEOUT_SECS", 5)?),
            broadcast_capacity: parsed(&lookup, "BROADCAST_CAPACITY", 256)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_owned(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8005)),
            history_limit: DEFAULT_HISTORY_LIMIT,
            db_max_connections: 16,
            db_timeout: Duration::from_secs(5),
            broadcast_capacity: 256,
        }
    }
}

fn parsed<T, D>(lookup: impl Fn(&str) -> Option<String>, key: &str, default: D) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    D: Display,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .with_context(|| format!("invalid {key}: {raw:?}"))
}
