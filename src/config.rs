use std::env;
use std::fmt;
use std::path::PathBuf;

use crate::error::AppError;

#[derive(Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub evidence_dir: PathBuf,
    pub max_body_bytes: usize,
    pub event_buffer_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let jwt_secret = env::var("JWT_SECRET")
            .ok()
            .filter(|secret| !secret.trim().is_empty())
            .ok_or_else(|| AppError::Internal("JWT_SECRET must be set".to_string()))?;

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            jwt_secret,
            token_ttl_hours: parse_or_default("TOKEN_TTL_HOURS", 168)?,
            evidence_dir: env::var("EVIDENCE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("uploads")),
            max_body_bytes: parse_or_default("MAX_BODY_BYTES", 16 * 1024 * 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that parse but cannot run the service.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.event_buffer_size == 0 {
            return Err(AppError::Internal(
                "invalid EVENT_BUFFER_SIZE: must be greater than zero".to_string(),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(AppError::Internal(
                "invalid MAX_BODY_BYTES: must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("http_port", &self.http_port)
            .field("log_level", &self.log_level)
            .field("jwt_secret", &"<redacted>")
            .field("token_ttl_hours", &self.token_ttl_hours)
            .field("evidence_dir", &self.evidence_dir)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
