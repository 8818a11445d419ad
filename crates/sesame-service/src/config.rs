//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sesame_core::client::{ClientConfig, DEFAULT_BASE_URL};
use sesame_core::{ControllerConfig, HistoryKind};

/// Default port of the webhook receiver.
pub const DEFAULT_PORT: u16 = 33892;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log core reconciliation at debug level.
    pub debug: bool,
    /// Server settings.
    pub server: ServerConfig,
    /// Sesame cloud API settings.
    pub api: ApiConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Reconciliation settings.
    pub reconcile: ReconcileConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration, collecting every error.
    ///
    /// A missing API token is an error: the bridge cannot reach the cloud
    /// without one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.api.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.reconcile.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address of the webhook receiver and HTTP API.
    pub bind: String,
    /// Capacity of the characteristic push channel.
    pub broadcast_buffer: usize,
}

/// Default broadcast buffer size for characteristic pushes.
pub const DEFAULT_BROADCAST_BUFFER: usize = 100;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{}", DEFAULT_PORT),
            broadcast_buffer: DEFAULT_BROADCAST_BUFFER,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
        } else {
            match self.bind.rsplit_once(':') {
                None => errors.push(ValidationError::new(
                    "server.bind",
                    format!(
                        "invalid bind address '{}': expected format 'host:port'",
                        self.bind
                    ),
                )),
                Some((_, port)) => match port.parse::<u16>() {
                    Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                    Err(_) => errors.push(ValidationError::new(
                        "server.bind",
                        format!("invalid port '{}': must be a number 1-65535", port),
                    )),
                    Ok(_) => {}
                },
            }
        }

        if self.broadcast_buffer == 0 {
            errors.push(ValidationError::new(
                "server.broadcast_buffer",
                "broadcast buffer must be at least 1",
            ));
        }

        errors
    }
}

/// Sesame cloud API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API token issued by the Sesame dashboard.
    pub token: String,
    /// API base URL.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Delay between command result polls in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of command result polls.
    pub max_polls: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 10,
            poll_interval_ms: 1000,
            max_polls: 30,
        }
    }
}

impl ApiConfig {
    /// Validate API configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.token.trim().is_empty() {
            errors.push(ValidationError::new(
                "api.token",
                "a token is required; create one in the Sesame dashboard",
            ));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            errors.push(ValidationError::new(
                "api.base_url",
                format!(
                    "URL must start with http:// or https://, got '{}'",
                    self.base_url
                ),
            ));
        }
        if self.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "api.timeout_secs",
                "timeout must be at least 1 second",
            ));
        }
        if self.max_polls == 0 {
            errors.push(ValidationError::new(
                "api.max_polls",
                "at least one result poll is required",
            ));
        }

        errors
    }

    /// Settings for the HTTP client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            token: self.token.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_polls: self.max_polls,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: sesame_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }

        errors
    }
}

/// Reconciliation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Minimum delay between two status reads of one lock, in milliseconds.
    pub cooldown_ms: u64,
    /// Battery percentage at or below which the low-battery flag is raised.
    pub low_battery_threshold: u8,
    /// Sensor presentation of the history (`door` or `motion`).
    pub history_kind: HistoryKind,
}

/// Maximum status read cool-down in milliseconds (1 minute).
pub const MAX_COOLDOWN_MS: u64 = 60_000;

impl Default for ReconcileConfig {
    fn default() -> Self {
        let controller = ControllerConfig::default();
        Self {
            cooldown_ms: sesame_core::DEFAULT_COOLDOWN.as_millis() as u64,
            low_battery_threshold: controller.low_battery_threshold,
            history_kind: controller.history_kind,
        }
    }
}

impl ReconcileConfig {
    /// Validate reconciliation configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.cooldown_ms > MAX_COOLDOWN_MS {
            errors.push(ValidationError::new(
                "reconcile.cooldown_ms",
                format!(
                    "cool-down {} is too long (maximum {} ms)",
                    self.cooldown_ms, MAX_COOLDOWN_MS
                ),
            ));
        }
        if self.low_battery_threshold > 100 {
            errors.push(ValidationError::new(
                "reconcile.low_battery_threshold",
                format!(
                    "threshold {} is not a percentage",
                    self.low_battery_threshold
                ),
            ));
        }

        errors
    }

    /// Status read cool-down.
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Per-lock controller settings.
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            low_battery_threshold: self.low_battery_threshold,
            history_kind: self.history_kind,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `api.token`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sesame")
        .join("server.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.api.token = "token".to_string();
        config
    }

    fn fields(config: &Config) -> Vec<String> {
        match config.validate() {
            Err(ConfigError::Validation(errors)) => errors.into_iter().map(|e| e.field).collect(),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(()) => Vec::new(),
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.bind, "0.0.0.0:33892");
        assert_eq!(config.server.broadcast_buffer, 100);
        assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.reconcile.cooldown_ms, 1000);
        assert_eq!(config.reconcile.low_battery_threshold, 20);
        assert_eq!(config.reconcile.history_kind, HistoryKind::Door);
        assert_eq!(config.storage.path, sesame_store::default_db_path());
        assert!(!config.debug);
    }

    #[test]
    fn test_default_config_requires_token() {
        assert_eq!(fields(&Config::default()), vec!["api.token"]);
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            debug = true

            [server]
            bind = "127.0.0.1:9000"

            [api]
            token = "secret"
            base_url = "http://localhost:8080/public"

            [storage]
            path = "/data/sesame.db"

            [reconcile]
            cooldown_ms = 2500
            low_battery_threshold = 30
            history_kind = "motion"
        "#;
        let config: Config = toml::from_str(toml).unwrap();

        assert!(config.debug);
        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(config.server.broadcast_buffer, 100);
        assert_eq!(config.api.token, "secret");
        assert_eq!(config.api.timeout_secs, 10);
        assert_eq!(config.storage.path, PathBuf::from("/data/sesame.db"));
        assert_eq!(config.reconcile.cooldown(), Duration::from_millis(2500));

        let controller = config.reconcile.controller_config();
        assert_eq!(controller.low_battery_threshold, 30);
        assert_eq!(controller.history_kind, HistoryKind::Motion);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_client_config_conversion() {
        let mut api = ApiConfig::default();
        api.token = "t".to_string();
        api.poll_interval_ms = 250;

        let client = api.client_config();
        assert_eq!(client.token, "t");
        assert_eq!(client.poll_interval, Duration::from_millis(250));
        assert_eq!(client.timeout, Duration::from_secs(10));
        assert_eq!(client.max_polls, 30);
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("server.toml");

        let mut config = valid_config();
        config.server.bind = "0.0.0.0:9090".to_string();
        config.reconcile.history_kind = HistoryKind::Motion;
        config.save(&config_path).unwrap();

        let loaded = Config::load_validated(&config_path).unwrap();
        assert_eq!(loaded.server.bind, "0.0.0.0:9090");
        assert_eq!(loaded.api.token, "token");
        assert_eq!(loaded.reconcile.history_kind, HistoryKind::Motion);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_unknown_history_kind_is_rejected() {
        let result: Result<Config, _> = toml::from_str("[reconcile]\nhistory_kind = \"window\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_default_config_path() {
        assert!(default_config_path().ends_with("sesame/server.toml"));
    }

    #[test]
    fn test_server_bind_validation() {
        let server = |bind: &str| ServerConfig {
            bind: bind.to_string(),
            ..ServerConfig::default()
        };

        assert!(server("127.0.0.1:8080").validate().is_empty());
        assert!(server("[::1]:8080").validate().is_empty());
        assert!(server("localhost:8080").validate().is_empty());

        let errors = server("").validate();
        assert!(errors[0].message.contains("cannot be empty"));
        let errors = server("127.0.0.1").validate();
        assert!(errors[0].message.contains("host:port"));
        let errors = server("127.0.0.1:0").validate();
        assert!(errors[0].message.contains("cannot be 0"));
        let errors = server("127.0.0.1:abc").validate();
        assert!(errors[0].message.contains("must be a number"));
    }

    #[test]
    fn test_validation_aggregates_errors() {
        let mut config = Config::default();
        config.server.broadcast_buffer = 0;
        config.api.base_url = "ftp://example.com".to_string();
        config.reconcile.cooldown_ms = MAX_COOLDOWN_MS + 1;
        config.reconcile.low_battery_threshold = 101;

        let fields = fields(&config);
        assert_eq!(
            fields,
            vec![
                "server.broadcast_buffer",
                "api.token",
                "api.base_url",
                "reconcile.cooldown_ms",
                "reconcile.low_battery_threshold",
            ]
        );

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("  - api.token"));
    }
}
