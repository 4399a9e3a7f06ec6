//! Configuration management for opsguard.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values
//!
//! Allowed roots, reserved ports and the command policy are read once here and
//! are immutable for the life of the process.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::{AppState, ServerConfig};
use crate::cli::Args;
use crate::execution::{SafeExecutor, DEFAULT_SHELL};
use crate::security::{
    CommandPolicy, PathPolicy, RateLimitConfig, RateLimiter, Validator, DEFAULT_RESERVED_PORTS,
    MAX_WINDOW,
};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerSection,
    /// Security configuration.
    pub security: SecuritySection,
    /// Command execution configuration.
    pub execution: ExecutionSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable graceful shutdown.
    pub graceful_shutdown: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8400,
            graceful_shutdown: true,
        }
    }
}

/// Security configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    /// Directories that confined paths must live under.
    pub allowed_roots: Vec<PathBuf>,
    /// Directory holding one sub-directory per project. Defaults to the first allowed root.
    pub projects_root: Option<PathBuf>,
    /// Ports that may never be assigned.
    pub reserved_ports: Vec<u16>,
    /// Base command to allowed sub-actions.
    pub policy: BTreeMap<String, Vec<String>>,
    /// Rate limiting settings.
    pub rate_limit: RateLimitSection,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            allowed_roots: vec![PathBuf::from("/Users/mini-server/apps")],
            projects_root: None,
            reserved_ports: DEFAULT_RESERVED_PORTS.to_vec(),
            policy: CommandPolicy::default_table(),
            rate_limit: RateLimitSection::default(),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    /// Enable rate limiting.
    pub enabled: bool,
    /// Requests per window.
    pub max_requests: u32,
    /// Window size in seconds.
    pub window_secs: u64,
    /// Seconds between sweeps of expired windows.
    pub sweep_interval_secs: u64,
    /// Seconds an expired window is retained before the sweep removes it.
    pub grace_secs: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 10,
            window_secs: 60,
            sweep_interval_secs: 300,
            grace_secs: 60,
        }
    }
}

/// Command execution section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSection {
    /// Absolute path of the shell that runs composed command lines.
    pub shell: PathBuf,
    /// Timeout applied when a caller does not set one.
    pub default_timeout_secs: u64,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            shell: PathBuf::from(DEFAULT_SHELL),
            default_timeout_secs: 30,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("OPSGUARD_HOST") {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("OPSGUARD_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Some(roots) = std::env::var_os("OPSGUARD_ALLOWED_ROOTS") {
            let roots: Vec<PathBuf> = std::env::split_paths(&roots)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            if !roots.is_empty() {
                self.security.allowed_roots = roots;
            }
        }

        if let Ok(level) = std::env::var("OPSGUARD_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }

        if let Some(port) = args.port {
            self.server.port = port;
        }

        if args.no_rate_limit {
            self.security.rate_limit.enabled = false;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };

        config.apply_env();
        config.apply_args(args);

        Ok(config)
    }

    /// Convert to ServerConfig for the API server.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;

        let mut server_config = ServerConfig::new(host.to_string(), self.server.port);
        if !self.server.graceful_shutdown {
            server_config = server_config.without_graceful_shutdown();
        }

        Ok(server_config)
    }

    /// Rate limiter settings.
    pub fn rate_limit_config(&self) -> Result<RateLimitConfig, ConfigError> {
        let section = &self.security.rate_limit;
        if section.max_requests == 0 {
            return Err(ConfigError::InvalidValue(
                "rate_limit.max_requests",
                section.max_requests.to_string(),
            ));
        }
        if section.window_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "rate_limit.window_secs",
                section.window_secs.to_string(),
            ));
        }
        if section.window_secs > MAX_WINDOW.as_secs() {
            return Err(ConfigError::InvalidValue(
                "rate_limit.window_secs",
                section.window_secs.to_string(),
            ));
        }
        if section.grace_secs > MAX_WINDOW.as_secs() {
            return Err(ConfigError::InvalidValue(
                "rate_limit.grace_secs",
                section.grace_secs.to_string(),
            ));
        }
        if section.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "rate_limit.sweep_interval_secs",
                section.sweep_interval_secs.to_string(),
            ));
        }

        Ok(RateLimitConfig {
            enabled: section.enabled,
            max_requests: section.max_requests,
            window: Duration::from_secs(section.window_secs),
            sweep_interval: Duration::from_secs(section.sweep_interval_secs),
            grace: Duration::from_secs(section.grace_secs),
            ..RateLimitConfig::default()
        })
    }

    /// Build the immutable runtime components.
    ///
    /// Any error here is fatal: the server must not start with a malformed
    /// policy, path allow-list or limiter.
    pub fn build_state(&self) -> Result<AppState, ConfigError> {
        let paths = PathPolicy::new(&self.security.allowed_roots)?;

        let projects_root = match &self.security.projects_root {
            Some(root) => root.clone(),
            None => paths.roots()[0].clone(),
        };
        let projects_root = paths
            .confine(&projects_root)
            .map_err(|_| ConfigError::InvalidRoot(projects_root.display().to_string()))?
            .into_path_buf();

        let policy = CommandPolicy::from_table(&self.security.policy)?;

        if !self.execution.shell.is_absolute() {
            return Err(ConfigError::InvalidValue(
                "execution.shell",
                self.execution.shell.display().to_string(),
            ));
        }
        if self.execution.default_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "execution.default_timeout_secs",
                "0".to_string(),
            ));
        }

        let executor = SafeExecutor::new(Arc::new(policy))
            .with_shell(&self.execution.shell)
            .with_default_timeout(Duration::from_secs(self.execution.default_timeout_secs));
        let validator = Validator::new(self.security.reserved_ports.iter().copied(), paths);
        let limiter = RateLimiter::new(self.rate_limit_config()?);

        Ok(AppState::new(validator, executor, limiter, projects_root))
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Invalid host address.
    InvalidHost(String),
    /// Allowed root is relative, resolves to `/`, or is otherwise unusable.
    InvalidRoot(String),
    /// Command policy table is malformed.
    InvalidPolicy(String),
    /// A numeric or path setting is out of range.
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidHost(host) => write!(f, "invalid host address: {}", host),
            Self::InvalidRoot(root) => write!(f, "invalid allowed root: {}", root),
            Self::InvalidPolicy(reason) => write!(f, "invalid command policy: {}", reason),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for {}: '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
