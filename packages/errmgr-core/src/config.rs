//! Error manager configuration.
//!
//! Supports TOML config files, environment variable overrides, and defaults.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::budget::BudgetLimits;
use crate::error::{ErrMgrError, Result};

/// Default schema holding the task-info error tables.
pub const DEFAULT_TASK_INFO_SCHEMA: &str = "lightning_task_info";

/// Per-category limits for row-level errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MaxError {
    /// Tolerated syntax errors (default: 0)
    pub syntax: i64,
    /// Tolerated type errors (default: 0)
    #[serde(rename = "type")]
    pub type_error: i64,
    /// Tolerated charset errors (default: 0)
    pub charset: i64,
}

/// What to do with rows that conflict on a unique key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// No conflict handling configured
    #[default]
    None,
    /// Stop at the first conflict
    Error,
    /// Keep the newest row
    Replace,
    /// Keep the existing row
    Ignore,
}

/// Conflict budget settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Strategy applied to conflicting rows
    pub strategy: ConflictStrategy,
    /// Tolerated conflicts before the load fails (default: 10000)
    pub threshold: i64,
    /// Conflicting rows kept as evidence (default: 100)
    pub max_record_rows: i64,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            strategy: ConflictStrategy::None,
            threshold: 10_000,
            max_record_rows: 100,
        }
    }
}

/// Ingestion backend that produced the errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Sorted KV files ingested directly
    #[default]
    Local,
    /// Plain SQL statements against the target database
    Tidb,
}

/// Post-import duplicate resolution algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateResolution {
    /// Duplicates are not detected after import
    #[default]
    None,
    /// Record duplicates only
    Record,
    /// Remove all conflicting rows
    Remove,
    /// Replace with the newest row
    Replace,
}

/// Execution engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum retry attempts for transient storage errors (default: 3)
    pub max_retries: u32,
    /// Delay between retry attempts in milliseconds (default: 100)
    pub retry_delay_ms: u64,
    /// SQLite busy timeout in milliseconds (default: 5000)
    pub busy_timeout_ms: u64,
    /// Leave SQL text out of retry warnings (default: false); always on
    /// when `redact_log` is set
    pub hide_query_log: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 100,
            busy_timeout_ms: 5000,
            hide_query_log: false,
        }
    }
}

impl EngineConfig {
    /// Returns the retry delay as a `Duration`.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Error manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorManagerConfig {
    /// Identifier written into every error row
    pub task_id: i64,
    /// Schema for the error tables; empty disables persistence
    pub task_info_schema: String,
    /// Ingestion backend
    pub backend: Backend,
    /// Post-import duplicate resolution
    pub duplicate_resolution: DuplicateResolution,
    /// Replace user data in log events with `?`
    pub redact_log: bool,
    /// Rows fetched per page when resolving conflicts (default: 1000)
    pub resolve_page_size: i64,
    /// Row-level error limits
    pub max_error: MaxError,
    /// Conflict limits and strategy
    pub conflict: ConflictConfig,
    /// Execution engine tuning
    pub engine: EngineConfig,
}

impl Default for ErrorManagerConfig {
    fn default() -> Self {
        Self {
            task_id: 0,
            task_info_schema: DEFAULT_TASK_INFO_SCHEMA.to_string(),
            backend: Backend::Local,
            duplicate_resolution: DuplicateResolution::None,
            redact_log: false,
            resolve_page_size: 1000,
            max_error: MaxError::default(),
            conflict: ConflictConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl ErrorManagerConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ErrMgrError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| ErrMgrError::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration to a TOML file.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ErrMgrError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), toml)
            .map_err(|e| ErrMgrError::Config(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }

    /// Applies environment variable overrides.
    /// Environment variables are prefixed with `ERRMGR_`.
    /// Example: `ERRMGR_CONFLICT_THRESHOLD=50` overrides `conflict.threshold`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = env::var("ERRMGR_TASK_ID") {
            self.task_id = parse_env("task_id", &val)?;
        }
        if let Ok(val) = env::var("ERRMGR_TASK_INFO_SCHEMA") {
            self.task_info_schema = val;
        }
        if let Ok(val) = env::var("ERRMGR_MAX_ERROR_SYNTAX") {
            self.max_error.syntax = parse_env("max_error.syntax", &val)?;
        }
        if let Ok(val) = env::var("ERRMGR_MAX_ERROR_TYPE") {
            self.max_error.type_error = parse_env("max_error.type", &val)?;
        }
        if let Ok(val) = env::var("ERRMGR_MAX_ERROR_CHARSET") {
            self.max_error.charset = parse_env("max_error.charset", &val)?;
        }
        if let Ok(val) = env::var("ERRMGR_CONFLICT_THRESHOLD") {
            self.conflict.threshold = parse_env("conflict.threshold", &val)?;
        }
        if let Ok(val) = env::var("ERRMGR_CONFLICT_MAX_RECORD_ROWS") {
            self.conflict.max_record_rows = parse_env("conflict.max_record_rows", &val)?;
        }
        if let Ok(val) = env::var("ERRMGR_REDACT_LOG") {
            self.redact_log = parse_env("redact_log", &val)?;
        }
        self.validate()
    }

    /// Checks limits and names for consistency.
    pub fn validate(&self) -> Result<()> {
        let limits = [
            ("max_error.syntax", self.max_error.syntax),
            ("max_error.type", self.max_error.type_error),
            ("max_error.charset", self.max_error.charset),
            ("conflict.threshold", self.conflict.threshold),
            ("conflict.max_record_rows", self.conflict.max_record_rows),
        ];
        for (key, value) in limits {
            if value < 0 {
                return Err(ErrMgrError::Config(format!(
                    "{} must not be negative, got {}",
                    key, value
                )));
            }
        }
        if self.resolve_page_size <= 0 {
            return Err(ErrMgrError::Config(format!(
                "resolve_page_size must be positive, got {}",
                self.resolve_page_size
            )));
        }
        if !is_plain_identifier(&self.task_info_schema) {
            return Err(ErrMgrError::Config(format!(
                "task_info_schema must only contain ASCII letters, digits and '_', got {:?}",
                self.task_info_schema
            )));
        }
        Ok(())
    }

    /// Budget limits derived from this configuration.
    pub fn budget_limits(&self) -> BudgetLimits {
        BudgetLimits {
            syntax: self.max_error.syntax,
            type_error: self.max_error.type_error,
            charset: self.max_error.charset,
            conflict: self.conflict.threshold,
            conflict_record: self.conflict.max_record_rows,
        }
    }

    /// Engine settings to open an execution engine with. SQL text is hidden
    /// from retry warnings whenever log redaction is on.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            hide_query_log: self.engine.hide_query_log || self.redact_log,
            ..self.engine
        }
    }

    /// Returns `true` if errors are written to the task-info schema.
    pub fn persistence_enabled(&self) -> bool {
        !self.task_info_schema.is_empty()
    }

    /// Returns `true` if data and index conflicts go to `conflict_error_v1`.
    pub fn conflict_v1_enabled(&self) -> bool {
        self.duplicate_resolution != DuplicateResolution::None
    }

    /// Returns `true` if duplicate rows go to `conflict_records`.
    pub fn conflict_v2_enabled(&self) -> bool {
        match self.backend {
            Backend::Local => self.conflict.strategy != ConflictStrategy::None,
            Backend::Tidb => true,
        }
    }
}

/// Empty or `[A-Za-z0-9_]+`; the schema name also becomes part of a file name.
fn is_plain_identifier(name: &str) -> bool {
    name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn parse_env<T: std::str::FromStr>(key: &str, val: &str) -> Result<T> {
    val.parse()
        .map_err(|_| ErrMgrError::Config(format!("Invalid {}: {}", key, val)))
}
