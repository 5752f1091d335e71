//! Process configuration, read from the environment once at startup.

use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseDriver {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Empty, or a path starting with `/` and without a trailing slash.
    pub base_path: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub driver: DatabaseDriver,
    pub dsn: Option<String>,
    /// 1 silent, 2 error, 3 warn, 4 info, 5 debug.
    pub log_level: u8,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_secs: i64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub node_id: u16,
    pub purge_interval_secs: u64,
    pub rotate_interval_secs: u64,
    pub upload_dir: String,
    pub nats_url: Option<String>,
    pub bootstrap_admin: Option<(String, String)>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if secret.len() < 16 {
            return Err(ConfigError::Invalid {
                key: "JWT_SECRET",
                reason: "must be at least 16 characters".into(),
            });
        }
        let expiration_secs: i64 = parse_or(get("JWT_EXPIRATION"), "JWT_EXPIRATION", 7200)?;
        if expiration_secs <= 0 {
            return Err(ConfigError::Invalid { key: "JWT_EXPIRATION", reason: "must be positive".into() });
        }

        let driver = match get("DATABASE_DRIVER").as_deref() {
            None | Some("postgres") => DatabaseDriver::Postgres,
            Some("memory") => DatabaseDriver::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "DATABASE_DRIVER",
                    reason: format!("unknown driver {other}"),
                })
            }
        };
        let dsn = get("DATABASE_DSN").or_else(|| get("DATABASE_URL"));
        if driver == DatabaseDriver::Postgres && dsn.is_none() {
            return Err(ConfigError::Missing("DATABASE_DSN"));
        }
        let log_level: u8 = parse_or(get("DATABASE_LOG_LEVEL"), "DATABASE_LOG_LEVEL", 2)?;
        if !(1..=5).contains(&log_level) {
            return Err(ConfigError::Invalid { key: "DATABASE_LOG_LEVEL", reason: "must be 1..=5".into() });
        }

        let node_id: u16 = parse_or(get("SNOWFLAKE_NODE_ID"), "SNOWFLAKE_NODE_ID", 1)?;
        if node_id > 1023 {
            return Err(ConfigError::Invalid { key: "SNOWFLAKE_NODE_ID", reason: "must be 0..=1023".into() });
        }

        let bootstrap_admin = match (get("BOOTSTRAP_ADMIN_USERNAME"), get("BOOTSTRAP_ADMIN_PASSWORD")) {
            (Some(user), Some(pass)) => Some((user, pass)),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    key: "BOOTSTRAP_ADMIN_USERNAME",
                    reason: "username and password must be set together".into(),
                })
            }
        };

        Ok(Self {
            server: ServerConfig {
                host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
                port: parse_or(get("SERVER_PORT"), "SERVER_PORT", 8083)?,
                base_path: normalize_base_path(get("SERVER_BASE_PATH").as_deref().unwrap_or(""))?,
            },
            database: DatabaseConfig { driver, dsn, log_level },
            jwt: JwtConfig { secret, expiration_secs },
            node_id,
            purge_interval_secs: positive(get("REVOKED_TOKEN_PURGE_INTERVAL"), "REVOKED_TOKEN_PURGE_INTERVAL", 3600)?,
            rotate_interval_secs: positive(get("TEMP_TOKEN_ROTATE_INTERVAL"), "TEMP_TOKEN_ROTATE_INTERVAL", 3600)?,
            upload_dir: get("UPLOAD_DIR").unwrap_or_else(|| "uploads".into()),
            nats_url: get("NATS_URL"),
            bootstrap_admin,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid { key, reason: e.to_string() }),
    }
}

fn positive(value: Option<String>, key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match parse_or(value, key, default)? {
        0 => Err(ConfigError::Invalid { key, reason: "must be positive".into() }),
        n => Ok(n),
    }
}

fn normalize_base_path(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if !trimmed.starts_with('/') {
        return Err(ConfigError::Invalid { key: "SERVER_BASE_PATH", reason: "must start with /".into() });
    }
    Ok(trimmed.to_string())
}
