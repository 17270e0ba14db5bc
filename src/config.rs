use std::env;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

/// Server settings read from the environment (and `.env`). The listen address comes from the
/// Leptos configuration instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub pool_size: u32,
}

impl AppConfig {
    pub const DEFAULT_POOL_SIZE: u32 = 8;

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let pool_size = match lookup("DATABASE_POOL_SIZE") {
            None => Self::DEFAULT_POOL_SIZE,
            Some(value) => match value.trim().parse::<u32>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(ConfigError::InvalidNumber {
                        name: "DATABASE_POOL_SIZE",
                        value,
                    })
                }
            },
        };

        Ok(AppConfig {
            database_url,
            pool_size,
        })
    }
}
