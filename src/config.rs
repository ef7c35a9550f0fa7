use crate::time_utils::{parse_timezone, SiteTimezone};
use base64::{engine::general_purpose, Engine as _};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(&'static str),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Clone, Debug)]
pub struct DraftConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct ObjectStorageConfig {
    pub endpoint: String,
    pub public_base: String,
    pub api_key: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub session_key: Vec<u8>,
    pub timezone: SiteTimezone,
    pub drafts: DraftConfig,
    pub object_storage: Option<ObjectStorageConfig>,
    pub code_webhook_url: Option<String>,
    pub login_code_ttl: chrono::Duration,
    pub admin_email: Option<String>,
    pub production: bool,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_secs(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match var(name) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(name, e.to_string())),
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = var("BIND_ADDR").unwrap_or_else(|| {
            let port = var("PORT").unwrap_or_else(|| "3000".to_string());
            format!("0.0.0.0:{}", port)
        });

        let backend = match var("STORAGE_BACKEND").as_deref() {
            None | Some("postgres") => StorageBackend::Postgres,
            Some("memory") => StorageBackend::Memory,
            Some(other) => return Err(ConfigError::InvalidValue("STORAGE_BACKEND", other.to_string())),
        };
        let database_url = var("DATABASE_URL");
        if backend == StorageBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingVar("DATABASE_URL"));
        }

        let session_key = general_purpose::STANDARD
            .decode(var("SESSION_KEY").ok_or(ConfigError::MissingVar("SESSION_KEY"))?)
            .map_err(|e| ConfigError::InvalidValue("SESSION_KEY", e.to_string()))?;
        if session_key.len() < 32 {
            return Err(ConfigError::InvalidValue(
                "SESSION_KEY",
                "must decode to at least 32 bytes".to_string(),
            ));
        }

        let timezone = match var("APP_TIMEZONE") {
            Some(raw) => parse_timezone(&raw).ok_or(ConfigError::InvalidValue("APP_TIMEZONE", raw))?,
            None => SiteTimezone::default(),
        };

        let drafts = DraftConfig {
            api_base: var("DRAFT_API_BASE").unwrap_or_else(|| "https://api.siliconflow.cn/v1".to_string()),
            api_key: var("DRAFT_API_KEY"),
            model: var("DRAFT_MODEL").unwrap_or_else(|| "Qwen/Qwen2.5-7B-Instruct".to_string()),
            timeout: Duration::from_secs(parse_secs("DRAFT_TIMEOUT_SECS", 20)?),
        };

        let object_storage = var("OBJECT_STORAGE_URL").map(|endpoint| ObjectStorageConfig {
            public_base: var("OBJECT_STORAGE_PUBLIC_URL").unwrap_or_else(|| endpoint.clone()),
            api_key: var("OBJECT_STORAGE_KEY"),
            endpoint,
        });

        let production = ["PRODUCTION", "RAILWAY_ENVIRONMENT", "RENDER", "FLY_APP_NAME"]
            .iter()
            .any(|name| std::env::var(name).is_ok());

        Ok(Self {
            bind_addr,
            backend,
            database_url,
            session_key,
            timezone,
            drafts,
            object_storage,
            code_webhook_url: var("CODE_WEBHOOK_URL"),
            login_code_ttl: chrono::Duration::seconds(parse_secs("LOGIN_CODE_TTL_SECS", 600)? as i64),
            admin_email: var("ADMIN_EMAIL").map(|e| e.to_lowercase()),
            production,
        })
    }
}
