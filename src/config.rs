use serde::Deserialize;

use crate::idempotency::FallbackPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub redis: RedisSettings,
    #[serde(default)]
    pub idempotency: IdempotencySettings,
    #[serde(default)]
    pub application: ApplicationSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub url: String,
    /// Prepended to every stored key. Empty keeps keys verbatim, which is what
    /// existing deployments sharing the cache expect.
    pub key_prefix: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: String::new(),
        }
    }
}

/// Which fallback integration point a deployment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    Strict,
    Lenient,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdempotencySettings {
    pub fallback: FallbackMode,
    /// Only meaningful with the strict mode.
    pub retry_on_error: bool,
    /// Largest response body the middleware will buffer for capture.
    pub max_body_bytes: usize,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            fallback: FallbackMode::Lenient,
            retry_on_error: false,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl IdempotencySettings {
    pub fn policy(&self) -> FallbackPolicy {
        match self.fallback {
            FallbackMode::Strict => FallbackPolicy::Strict {
                retry_on_error: self.retry_on_error,
            },
            FallbackMode::Lenient => FallbackPolicy::Lenient,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }
}
