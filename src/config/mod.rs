//! Configuration management
//!
//! Configuration is read from a YAML file (`config.yml` by default) and then
//! overridden by environment variables. Every section and field has a
//! default, so a missing or empty file yields a runnable development setup.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::services::rate_limiter::MAX_WINDOW_SECONDS;

/// Secret shipped in the defaults. Refused when running in production.
pub const DEFAULT_SECRET_KEY: &str = "change-me-in-production";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Application and HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub environment: Environment,
    /// Requests allowed per client within one window
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: u32,
    /// Rate limit window in seconds
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_version(),
            host: default_host(),
            port: default_port(),
            debug: false,
            environment: Environment::default(),
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window: default_rate_limit_window(),
        }
    }
}

fn default_app_name() -> String {
    "crud-starter".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_rate_limit_requests() -> u32 {
    100
}

fn default_rate_limit_window() -> u64 {
    60
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Testing,
}

impl Environment {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            "testing" | "test" => Some(Self::Testing),
            _ => None,
        }
    }
}

/// Token signing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
    /// Only HS256 is supported
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_token_expire_minutes")]
    pub access_token_expire_minutes: i64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret_key: default_secret_key(),
            algorithm: default_algorithm(),
            access_token_expire_minutes: default_token_expire_minutes(),
        }
    }
}

fn default_secret_key() -> String {
    DEFAULT_SECRET_KEY.to_string()
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

fn default_token_expire_minutes() -> i64 {
    30
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Connection URL, or a file path for SQLite
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/app.db".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    #[default]
    Sqlite,
    Mysql,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub driver: CacheDriver,
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Default entry lifetime in seconds
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            driver: CacheDriver::default(),
            redis_url: None,
            ttl_seconds: default_ttl(),
        }
    }
}

fn default_ttl() -> u64 {
    3600
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheDriver {
    #[default]
    Memory,
    Redis,
}

/// Cross-origin settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins. `*` allows any origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            allowed_methods: default_allowed_methods(),
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_allowed_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

impl CorsConfig {
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*")
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level directive for this crate (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// A missing or empty file yields the defaults. Malformed YAML is an
    /// error carrying the line and column of the problem.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: format_yaml_error(&e),
        })
    }

    /// Load from file, then apply environment variable overrides.
    ///
    /// Recognised variables: `APP_NAME`, `APP_HOST`, `APP_PORT`,
    /// `APP_DEBUG`, `APP_ENVIRONMENT`, `APP_RATE_LIMIT_REQUESTS`,
    /// `APP_RATE_LIMIT_WINDOW`, `SECURITY_SECRET_KEY`,
    /// `SECURITY_ACCESS_TOKEN_EXPIRE_MINUTES`, `DATABASE_DRIVER`,
    /// `DATABASE_URL`, `CACHE_DRIVER`, `REDIS_URL`, `CACHE_TTL_SECONDS`,
    /// `CORS_ALLOWED_ORIGINS`, `LOGGING_LOG_LEVEL`, `LOGGING_LOG_FORMAT`.
    /// Values that fail to parse are ignored.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("APP_NAME") {
            self.app.name = name;
        }
        if let Ok(host) = std::env::var("APP_HOST") {
            self.app.host = host;
        }
        if let Some(port) = env_parse::<u16>("APP_PORT") {
            self.app.port = port;
        }
        if let Some(debug) = env_parse::<bool>("APP_DEBUG") {
            self.app.debug = debug;
        }
        if let Some(env) = std::env::var("APP_ENVIRONMENT")
            .ok()
            .and_then(|v| Environment::parse(&v))
        {
            self.app.environment = env;
        }
        if let Some(requests) = env_parse::<u32>("APP_RATE_LIMIT_REQUESTS") {
            self.app.rate_limit_requests = requests;
        }
        if let Some(window) = env_parse::<u64>("APP_RATE_LIMIT_WINDOW") {
            self.app.rate_limit_window = window;
        }

        if let Ok(secret) = std::env::var("SECURITY_SECRET_KEY") {
            self.security.secret_key = secret;
        }
        if let Some(minutes) = env_parse::<i64>("SECURITY_ACCESS_TOKEN_EXPIRE_MINUTES") {
            self.security.access_token_expire_minutes = minutes;
        }

        if let Ok(driver) = std::env::var("DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {}
            }
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(driver) = std::env::var("CACHE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "memory" => self.cache.driver = CacheDriver::Memory,
                "redis" => self.cache.driver = CacheDriver::Redis,
                _ => {}
            }
        }
        if let Ok(redis_url) = std::env::var("REDIS_URL") {
            self.cache.redis_url = Some(redis_url);
        }
        if let Some(ttl) = env_parse::<u64>("CACHE_TTL_SECONDS") {
            self.cache.ttl_seconds = ttl;
        }

        if let Ok(origins) = std::env::var("CORS_ALLOWED_ORIGINS") {
            self.cors.allowed_origins = split_list(&origins);
        }

        if let Ok(level) = std::env::var("LOGGING_LOG_LEVEL") {
            self.logging.log_level = level.to_lowercase();
        }
        if let Ok(format) = std::env::var("LOGGING_LOG_FORMAT") {
            match format.to_lowercase().as_str() {
                "json" => self.logging.log_format = LogFormat::Json,
                "text" => self.logging.log_format = LogFormat::Text,
                _ => {}
            }
        }
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.port == 0 {
            return Err(ConfigError::ValidationError(
                "app.port must be greater than 0".to_string(),
            ));
        }
        if self.security.secret_key.is_empty() {
            return Err(ConfigError::ValidationError(
                "security.secret_key must not be empty".to_string(),
            ));
        }
        if self.app.environment == Environment::Production
            && self.security.secret_key == DEFAULT_SECRET_KEY
        {
            return Err(ConfigError::ValidationError(
                "security.secret_key must be changed in production".to_string(),
            ));
        }
        if !self.security.algorithm.eq_ignore_ascii_case("HS256") {
            return Err(ConfigError::ValidationError(format!(
                "unsupported signing algorithm: {}",
                self.security.algorithm
            )));
        }
        if self.security.access_token_expire_minutes <= 0 {
            return Err(ConfigError::ValidationError(
                "security.access_token_expire_minutes must be positive".to_string(),
            ));
        }
        if self.app.rate_limit_window == 0 || self.app.rate_limit_window > MAX_WINDOW_SECONDS {
            return Err(ConfigError::ValidationError(format!(
                "app.rate_limit_window must be between 1 and {} seconds",
                MAX_WINDOW_SECONDS
            )));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.app.environment == Environment::Production
    }

    /// Socket address string the server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.app.host, self.app.port)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Parse a comma separated list, dropping empty entries
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared by every test that touches process environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        /// Any port and rate limit written to the file is read back unchanged
        #[test]
        fn prop_file_values_round_trip(
            port in 1u16..=65535,
            requests in 1u32..10_000,
            window in 1u64..3600,
        ) {
            let mut file = NamedTempFile::new().unwrap();
            write!(
                file,
                "app:\n  port: {}\n  rate_limit_requests: {}\n  rate_limit_window: {}\n",
                port, requests, window
            ).unwrap();

            let config = Config::load(file.path()).unwrap();
            prop_assert_eq!(config.app.port, port);
            prop_assert_eq!(config.app.rate_limit_requests, requests);
            prop_assert_eq!(config.app.rate_limit_window, window);
            prop_assert_eq!(config.app.host, "0.0.0.0");
        }

        /// Env port override wins over the file value
        #[test]
        fn prop_env_port_overrides_file(file_port in 1u16..=65535, env_port in 1u16..=65535) {
            let _guard = super::CONFIG_ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let mut file = NamedTempFile::new().unwrap();
            write!(file, "app:\n  port: {}\n", file_port).unwrap();

            std::env::set_var("APP_PORT", env_port.to_string());
            let config = Config::load_with_env(file.path());
            std::env::remove_var("APP_PORT");

            prop_assert_eq!(config.unwrap().app.port, env_port);
        }
    }
}
