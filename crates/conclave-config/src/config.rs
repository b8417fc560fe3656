//! Typed application configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that points at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "CONCLAVE_CONFIG";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub dispatch: DispatchConfig,
    pub collaboration: CollaborationConfig,
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    /// Worker pools seeded at startup
    pub pools: Vec<PoolConfig>,
}

/// Dispatcher and registry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Number of task results kept in the in-memory history log
    pub history_limit: usize,
    /// Number of recent errors kept per worker
    pub recent_error_limit: usize,
    /// Deadline applied to every execution unless the caller supplies one
    pub default_deadline_ms: Option<u64>,
    pub adaptive: AdaptiveConfig,
    pub intelligent: IntelligentConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            history_limit: 200,
            recent_error_limit: 50,
            default_deadline_ms: None,
            adaptive: AdaptiveConfig::default(),
            intelligent: IntelligentConfig::default(),
        }
    }
}

/// Thresholds used by the adaptive strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Below this system load, multi-task batches run in parallel
    pub parallel_load_ceiling: f64,
    /// Distributed mode kicks in when available workers exceed
    /// `distributed_factor * task_count`
    pub distributed_factor: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            parallel_load_ceiling: 0.3,
            distributed_factor: 2.0,
        }
    }
}

/// Settings for the workflow-level strategy picker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IntelligentConfig {
    /// Workflows with more tasks than this are considered complex
    pub complex_workflow_threshold: usize,
}

impl Default for IntelligentConfig {
    fn default() -> Self {
        Self {
            complex_workflow_threshold: 10,
        }
    }
}

/// Collaboration network settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollaborationConfig {
    pub initial_strength: f64,
    pub initial_trust: f64,
    pub strength_step: f64,
    pub strength_ceiling: f64,
    pub trust_step: f64,
    pub trust_ceiling: f64,
    /// Estimate used when a task carries none
    pub default_estimate_ms: u64,
    pub connection_history_limit: usize,
    pub inbox_limit: usize,
}

impl Default for CollaborationConfig {
    fn default() -> Self {
        Self {
            initial_strength: 1.0,
            initial_trust: 0.8,
            strength_step: 0.1,
            strength_ceiling: 2.0,
            trust_step: 0.05,
            trust_ceiling: 1.0,
            default_estimate_ms: 3000,
            connection_history_limit: 100,
            inbox_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
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

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            enable_cors: true,
        }
    }
}

/// A worker pool to create at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    pub name: String,
    /// One of `native`, `autogen`, `superagent`, `crewai`, `semantic-kernel`
    #[serde(default = "default_pool_kind")]
    pub kind: String,
    #[serde(default)]
    pub workers: Vec<WorkerSeed>,
}

fn default_pool_kind() -> String {
    "native".to_string()
}

/// A worker registered at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerSeed {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

fn default_max_concurrency() -> u32 {
    1
}

impl AppConfig {
    /// Load configuration from `$CONCLAVE_CONFIG`, then the platform config
    /// directory, falling back to defaults when neither file exists.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::from_file(Path::new(&path));
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Default location of the config file for this platform.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("rs", "conclave", "conclave")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the dispatch core cannot honour.
    pub fn validate(&self) -> Result<()> {
        let adaptive = &self.dispatch.adaptive;
        if !(0.0..=1.0).contains(&adaptive.parallel_load_ceiling) {
            return Err(ConfigError::Invalid(format!(
                "dispatch.adaptive.parallel_load_ceiling must be within [0, 1], got {}",
                adaptive.parallel_load_ceiling
            )));
        }
        if adaptive.distributed_factor <= 0.0 {
            return Err(ConfigError::Invalid(
                "dispatch.adaptive.distributed_factor must be positive".to_string(),
            ));
        }

        let collab = &self.collaboration;
        if collab.strength_ceiling < collab.initial_strength {
            return Err(ConfigError::Invalid(
                "collaboration.strength_ceiling is below initial_strength".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&collab.initial_trust)
            || !(0.0..=1.0).contains(&collab.trust_ceiling)
            || collab.trust_ceiling < collab.initial_trust
        {
            return Err(ConfigError::Invalid(
                "collaboration trust values must satisfy 0 <= initial_trust <= trust_ceiling <= 1"
                    .to_string(),
            ));
        }
        if collab.strength_step < 0.0 || collab.trust_step < 0.0 {
            return Err(ConfigError::Invalid(
                "collaboration steps must not be negative".to_string(),
            ));
        }

        for pool in &self.pools {
            for worker in &pool.workers {
                if worker.max_concurrency == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "worker {} in pool {} has max_concurrency 0",
                        worker.id, pool.name
                    )));
                }
            }
        }

        Ok(())
    }
}
