use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::control::WatcherConfig;
use crate::coordination::ShutdownConfig;
use crate::domain::DEFAULT_RECORD_KEY;
use crate::supervisor::SupervisorConfig;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Identifies this instance in heartbeats and control writes
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub local: LocalControlConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_instance_id() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| format!("drover-{}", std::process::id()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    /// PostgreSQL connection URL
    #[serde(default)]
    pub database_url: Option<String>,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Key of the cluster-wide control record
    #[serde(default = "default_record_key")]
    pub record_key: String,
}

fn default_backend() -> StoreBackend {
    StoreBackend::Postgres
}

fn default_max_connections() -> u32 {
    5
}

fn default_record_key() -> String {
    DEFAULT_RECORD_KEY.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database_url: None,
            max_connections: default_max_connections(),
            record_key: default_record_key(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Watch the cluster control record at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Try push notifications before polling
    #[serde(default = "default_true")]
    pub enable_push: bool,
    /// Polling interval in POLL mode
    #[serde(default = "default_control_poll_secs")]
    pub poll_interval_secs: u64,
    /// Per-read timeout
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Compare-and-swap attempts for cluster writes
    #[serde(default = "default_cas_max_retries")]
    pub cas_max_retries: u32,
}

fn default_true() -> bool {
    true
}

fn default_control_poll_secs() -> u64 {
    10
}

fn default_read_timeout_ms() -> u64 {
    5000
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_cas_max_retries() -> u32 {
    5
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_push: true,
            poll_interval_secs: default_control_poll_secs(),
            read_timeout_ms: default_read_timeout_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            cas_max_retries: default_cas_max_retries(),
        }
    }
}

impl ControlConfig {
    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            enable_push: self.enable_push,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalControlConfig {
    #[serde(default = "default_control_file")]
    pub control_file: PathBuf,
    #[serde(default = "default_file_poll_ms")]
    pub file_poll_interval_ms: u64,
    /// Install SIGUSR1/SIGUSR2/SIGTERM/SIGINT handlers
    #[serde(default = "default_true")]
    pub signals: bool,
}

fn default_control_file() -> PathBuf {
    PathBuf::from("/tmp/control/state")
}

fn default_file_poll_ms() -> u64 {
    2000
}

impl Default for LocalControlConfig {
    fn default() -> Self {
        Self {
            control_file: default_control_file(),
            file_poll_interval_ms: default_file_poll_ms(),
            signals: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Sleep between batches
    #[serde(default = "default_worker_poll_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// Grace period for the in-flight batch on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_worker_poll_secs() -> u64 {
    5
}

fn default_batch_size() -> i64 {
    100
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_worker_poll_secs(),
            batch_size: default_batch_size(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn shutdown_config(&self) -> ShutdownConfig {
        ShutdownConfig {
            grace_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            ..ShutdownConfig::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_health_dir() -> PathBuf {
    PathBuf::from("/tmp/health")
}

fn default_heartbeat_secs() -> u64 {
    5
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            dir: default_health_dir(),
            heartbeat_interval_secs: default_heartbeat_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    /// HTTP API port (default: 8080)
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSettings {
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_restarts() -> u32 {
    10
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl SupervisorSettings {
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_restarts: self.max_restarts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily-rotated log files
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info,drover=debug,sqlx=warn".to_string()
}

/// Configuration exposed by `GET /api/config`; omits connection strings
#[derive(Debug, Clone, Serialize)]
pub struct PublicConfig {
    pub instance_id: String,
    pub store_backend: StoreBackend,
    pub record_key: String,
    pub control_enabled: bool,
    pub enable_push: bool,
    pub control_poll_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub batch_size: i64,
    pub shutdown_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub control_file: PathBuf,
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", default_log_level())?
            .set_default("logging.json", false)?
            .set_default("store.backend", "postgres")?
            .set_default("worker.poll_interval_secs", 5)?
            .set_default("control.poll_interval_secs", 10)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("DROVER_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (DROVER__WORKER__BATCH_SIZE, etc.)
            .add_source(
                Environment::with_prefix("DROVER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Configuration for single-process runs against the in-memory store
    pub fn in_memory() -> Self {
        Self {
            instance_id: default_instance_id(),
            store: StoreConfig {
                backend: StoreBackend::Memory,
                ..StoreConfig::default()
            },
            control: ControlConfig::default(),
            local: LocalControlConfig::default(),
            worker: WorkerConfig::default(),
            health: HealthConfig::default(),
            api: ApiConfig::default(),
            supervisor: SupervisorSettings::default(),
            logging: LoggingConfig {
                level: default_log_level(),
                ..LoggingConfig::default()
            },
        }
    }

    pub fn public(&self) -> PublicConfig {
        PublicConfig {
            instance_id: self.instance_id.clone(),
            store_backend: self.store.backend,
            record_key: self.store.record_key.clone(),
            control_enabled: self.control.enabled,
            enable_push: self.control.enable_push,
            control_poll_interval_secs: self.control.poll_interval_secs,
            poll_interval_secs: self.worker.poll_interval_secs,
            batch_size: self.worker.batch_size,
            shutdown_timeout_secs: self.worker.shutdown_timeout_secs,
            heartbeat_interval_secs: self.health.heartbeat_interval_secs,
            control_file: self.local.control_file.clone(),
            log_level: self.logging.level.clone(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.instance_id.trim().is_empty() {
            errors.push("instance_id must not be empty".to_string());
        }

        if self.store.backend == StoreBackend::Postgres
            && self
                .store
                .database_url
                .as_deref()
                .map_or(true, |url| url.trim().is_empty())
        {
            errors.push("store.database_url is required for the postgres backend".to_string());
        }

        if self.store.record_key.trim().is_empty() {
            errors.push("store.record_key must not be empty".to_string());
        }

        if self.control.poll_interval_secs == 0 {
            errors.push("control.poll_interval_secs must be at least 1".to_string());
        }

        if self.control.backoff_base_ms == 0
            || self.control.backoff_base_ms > self.control.backoff_max_ms
        {
            errors.push(
                "control.backoff_base_ms must be positive and not exceed backoff_max_ms"
                    .to_string(),
            );
        }

        if self.control.cas_max_retries == 0 {
            errors.push("control.cas_max_retries must be at least 1".to_string());
        }

        if self.local.file_poll_interval_ms == 0 || self.local.file_poll_interval_ms > 2000 {
            errors.push("local.file_poll_interval_ms must be between 1 and 2000".to_string());
        }

        if self.worker.poll_interval_secs == 0 {
            errors.push("worker.poll_interval_secs must be at least 1".to_string());
        }

        if self.worker.batch_size < 1 {
            errors.push("worker.batch_size must be at least 1".to_string());
        }

        if self.worker.shutdown_timeout_secs == 0 {
            errors.push("worker.shutdown_timeout_secs must be at least 1".to_string());
        }

        if self.health.heartbeat_interval_secs == 0 {
            errors.push("health.heartbeat_interval_secs must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
