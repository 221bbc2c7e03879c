//! Configuration management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::application::errors::ConfigError;

/// Service configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub app: AppConfig,
    pub http: HttpConfig,
    pub chat: ChatConfig,
    pub security: SecurityConfig,
    pub database: DatabaseConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AppConfig {
    pub name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "switchyard".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HttpConfig {
    pub addr: String,
    pub body_limit_bytes: usize,
    /// Deadline handed to handlers through the dispatch context; 0 disables it
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            body_limit_bytes: 1024 * 1024,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ChatConfig {
    pub prefix: String,
    pub telegram: TelegramConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            prefix: "/".to_string(),
            telegram: TelegramConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub token: Option<String>,
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            poll_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SecurityConfig {
    pub rate_limit: RateLimitConfig,
    pub allowlist: AllowListConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 20,
            window_seconds: 60,
        }
    }
}

/// Principals allowed through; only enforced when enabled
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AllowListConfig {
    pub enabled: bool,
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("switchyard.db"),
            busy_timeout_ms: 5000,
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()));
        }
        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "database.busy-timeout-ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(format!("Failed to render config: {}", e)))
    }

    /// Defaults with environment overrides applied
    pub fn load_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    /// Apply `SWITCHYARD_*` environment overrides on top of this config
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("SWITCHYARD_HTTP_ADDR") {
            self.http.addr = addr;
        }

        if let Ok(token) = std::env::var("SWITCHYARD_BOT_TOKEN") {
            self.chat.telegram.token = Some(token);
            self.chat.telegram.enabled = true;
        }

        if let Ok(path) = std::env::var("SWITCHYARD_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }

        if let Ok(level) = std::env::var("SWITCHYARD_LOG") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.http
            .addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue(format!("http.addr {}: {}", self.http.addr, e)))?;

        if self.http.body_limit_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "http.body-limit-bytes must be greater than 0".to_string(),
            ));
        }

        if self.chat.prefix.trim().is_empty() {
            return Err(ConfigError::MissingField("chat.prefix".to_string()));
        }

        if self.chat.telegram.enabled && self.chat.telegram.token.is_none() {
            return Err(ConfigError::MissingField("chat.telegram.token".to_string()));
        }

        let rate_limit = &self.security.rate_limit;
        if rate_limit.enabled && (rate_limit.max_requests == 0 || rate_limit.window_seconds == 0) {
            return Err(ConfigError::InvalidValue(
                "security.rate-limit needs max-requests and window-seconds above 0".to_string(),
            ));
        }

        if !self.metrics.path.starts_with('/') {
            return Err(ConfigError::InvalidValue(format!(
                "metrics.path must start with '/': {}",
                self.metrics.path
            )));
        }

        self.database.validate()
    }

    /// Check if a principal passes the allowlist
    pub fn is_user_allowed(&self, user_id: &str) -> bool {
        if !self.security.allowlist.enabled {
            return true;
        }
        self.security.allowlist.users.iter().any(|u| u == user_id)
    }
}
