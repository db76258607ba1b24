use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: usize,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub dir: PathBuf,
    /// URL prefix under which stored blobs are served
    pub public_prefix: String,
    pub max_image_bytes: u64,
    pub max_video_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct Account {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// `None` runs the relay without durable history
    pub database: Option<DatabaseConfig>,
    /// Replay size on join and default page size of the history query
    pub history_limit: usize,
    pub max_history_limit: usize,
    /// Messages retained when running without a database
    pub memory_capacity: usize,
    pub uploads: UploadConfig,
    pub accounts: Vec<Account>,
    pub ws: WsConfig,
}

fn parse_var<T: FromStr>(name: &str, default: T) -> AppResult<T> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{name} has invalid value {raw:?}"))),
        _ => Ok(default),
    }
}

fn account_from_env(prefix: &str) -> Option<Account> {
    let username = env::var(format!("{prefix}_USERNAME")).ok()?;
    let password = env::var(format!("{prefix}_PASSWORD")).ok()?;
    if username.trim().is_empty() || password.is_empty() {
        return None;
    }
    Some(Account { username, password })
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = parse_var("PORT", 3000u16)?;

        let database = match env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => Some(DatabaseConfig {
                url,
                max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 16usize)?,
            }),
            _ => None,
        };

        let history_limit = parse_var("HISTORY_LIMIT", 50usize)?;
        let max_history_limit = parse_var("MAX_HISTORY_LIMIT", 200usize)?;
        if history_limit == 0 || history_limit > max_history_limit {
            return Err(AppError::Config(format!(
                "HISTORY_LIMIT must be in 1..={max_history_limit}"
            )));
        }

        let memory_capacity = parse_var("MEMORY_HISTORY_CAPACITY", 10_000usize)?;
        if memory_capacity < max_history_limit {
            return Err(AppError::Config(format!(
                "MEMORY_HISTORY_CAPACITY must be at least MAX_HISTORY_LIMIT ({max_history_limit})"
            )));
        }

        let uploads = UploadConfig {
            dir: PathBuf::from(env::var("UPLOAD_DIR").unwrap_or_else(|_| "./uploads".into())),
            public_prefix: env::var("UPLOAD_PUBLIC_PREFIX")
                .unwrap_or_else(|_| "/uploads".into())
                .trim_end_matches('/')
                .to_string(),
            max_image_bytes: parse_var("MAX_IMAGE_BYTES", 10 * 1024 * 1024u64)?,
            max_video_bytes: parse_var("MAX_VIDEO_BYTES", 50 * 1024 * 1024u64)?,
        };

        let accounts = ["USER_A", "USER_B"]
            .iter()
            .filter_map(|prefix| account_from_env(prefix))
            .collect::<Vec<_>>();

        let heartbeat_secs = parse_var("WS_HEARTBEAT_INTERVAL_SECS", 5u64)?;
        let timeout_secs = parse_var("WS_CLIENT_TIMEOUT_SECS", 30u64)?;
        if heartbeat_secs == 0 {
            return Err(AppError::Config(
                "WS_HEARTBEAT_INTERVAL_SECS must be at least 1".into(),
            ));
        }
        // a timeout at or below the ping interval drops clients that are answering pings
        if timeout_secs <= heartbeat_secs {
            return Err(AppError::Config(format!(
                "WS_CLIENT_TIMEOUT_SECS must be greater than WS_HEARTBEAT_INTERVAL_SECS ({heartbeat_secs})"
            )));
        }
        let ws = WsConfig {
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            client_timeout: Duration::from_secs(timeout_secs),
        };

        Ok(Self {
            host,
            port,
            database,
            history_limit,
            max_history_limit,
            memory_capacity,
            uploads,
            accounts,
            ws,
        })
    }

    /// Defaults used by tests; no database, uploads under the system temp dir.
    pub fn test_defaults() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            database: None,
            history_limit: 50,
            max_history_limit: 200,
            memory_capacity: 10_000,
            uploads: UploadConfig {
                dir: env::temp_dir().join("chat-relay-uploads"),
                public_prefix: "/uploads".into(),
                max_image_bytes: 10 * 1024 * 1024,
                max_video_bytes: 50 * 1024 * 1024,
            },
            accounts: vec![
                Account {
                    username: "alice".into(),
                    password: "alice-pass".into(),
                },
                Account {
                    username: "bob".into(),
                    password: "bob-pass".into(),
                },
            ],
            ws: WsConfig {
                heartbeat_interval: Duration::from_secs(5),
                client_timeout: Duration::from_secs(30),
            },
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
