//! Runtime configuration
//!
//! Everything has a default, so an empty JSON object (or no file at all) is
//! a valid configuration.
//!
//! ```json
//! {
//!   "engine":    { "allow_set_capacity": 262144, "event_buffer_bytes": 262144 },
//!   "audit":     { "disallowed": ["/etc/shadow", "/secret/*"], "threshold": 2 },
//!   "telemetry": { "json_logs": false, "otlp_endpoint": null }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::events::{DEFAULT_EVENT_BUFFER_BYTES, OPEN_EVENT_SIZE};
use crate::policy::allow_set::DEFAULT_ALLOW_SET_CAPACITY;
use crate::policy::deny_list::DEFAULT_DENY_LIST_CAPACITY;
use crate::policy::mode::DEFAULT_MODE_CAPACITY;
use crate::policy::violations::DEFAULT_VIOLATION_CAPACITY;

/// Default strikes before the auditor blocks a process
pub const DEFAULT_AUDIT_THRESHOLD: u32 = 2;

/// Store sizes and audit-channel behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mode_capacity: usize,
    pub deny_list_capacity: usize,
    pub allow_set_capacity: usize,
    pub violation_capacity: usize,
    /// Audit channel size in bytes; divided by the record size to get slots
    pub event_buffer_bytes: usize,
    /// Emit a record for deny-list hits
    pub audit_deny_list_hits: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode_capacity: DEFAULT_MODE_CAPACITY,
            deny_list_capacity: DEFAULT_DENY_LIST_CAPACITY,
            allow_set_capacity: DEFAULT_ALLOW_SET_CAPACITY,
            violation_capacity: DEFAULT_VIOLATION_CAPACITY,
            event_buffer_bytes: DEFAULT_EVENT_BUFFER_BYTES,
            audit_deny_list_hits: true,
        }
    }
}

/// Pattern auditor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Glob patterns or substrings of paths that count as a strike
    pub disallowed: Vec<String>,
    /// Strikes before the process is put on the deny-list
    pub threshold: u32,
    /// Only audit this pid; `None` audits every process
    pub target_pid: Option<u32>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            disallowed: Vec::new(),
            threshold: DEFAULT_AUDIT_THRESHOLD,
            target_pid: None,
        }
    }
}

/// Logging and trace export
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// OTLP collector endpoint; traces are only exported when set
    pub otlp_endpoint: Option<String>,
    pub json_logs: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub audit: AuditConfig,
    pub telemetry: TelemetryConfig,
}

/// Error type for configuration loading
#[derive(Debug)]
pub enum ConfigError {
    /// Could not read the file
    Io(std::io::Error),
    /// Not valid JSON for `Config`
    Parse(serde_json::Error),
    /// Parsed, but a value is out of range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config read error: {}", e),
            ConfigError::Parse(e) => write!(f, "config parse error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl Config {
    /// Load and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        let capacities = [
            ("mode_capacity", engine.mode_capacity),
            ("deny_list_capacity", engine.deny_list_capacity),
            ("allow_set_capacity", engine.allow_set_capacity),
            ("violation_capacity", engine.violation_capacity),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
            }
        }

        if engine.event_buffer_bytes < OPEN_EVENT_SIZE {
            return Err(ConfigError::Invalid(format!(
                "event_buffer_bytes must hold at least one record ({} bytes)",
                OPEN_EVENT_SIZE
            )));
        }

        if self.audit.threshold == 0 {
            return Err(ConfigError::Invalid("audit threshold must be > 0".to_string()));
        }

        Ok(())
    }
}
