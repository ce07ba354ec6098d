//! Configuration loading, validation, and management for loopgate.
//!
//! Loads configuration from `~/.loopgate/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use loopgate_core::approval::{ApprovalPolicy, ToolPermission};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.loopgate/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopgateConfig {
    /// Loop behavior
    #[serde(default, rename = "loop")]
    pub loop_settings: LoopSettings,

    /// Which tools require human approval
    #[serde(default)]
    pub approval: ApprovalConfig,

    /// Where suspended sessions are kept
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Built-in tool settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Pre-execution argument screening
    #[serde(default)]
    pub guard: GuardConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSettings {
    /// Maximum inferences per user message
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Instructions sent with every inference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Use the gateway's streaming interface
    #[serde(default)]
    pub streaming: bool,

    /// Run approved calls of one turn concurrently
    #[serde(default = "default_true")]
    pub concurrent_tools: bool,

    /// Per-call timeout (0 = none)
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// "continue" (fold the denial and re-infer) or "stop"
    #[serde(default = "default_on_denial")]
    pub on_denial: String,
}

fn default_max_turns() -> u32 {
    10
}
fn default_true() -> bool {
    true
}
fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_on_denial() -> String {
    "continue".into()
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            system_prompt: None,
            streaming: false,
            concurrent_tools: true,
            tool_timeout_secs: default_tool_timeout_secs(),
            on_denial: default_on_denial(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// "allow", "ask" or "deny" for tools not listed below
    #[serde(default = "default_permission")]
    pub default: String,

    /// Per-tool permission
    #[serde(default)]
    pub tools: HashMap<String, String>,
}

fn default_permission() -> String {
    "ask".into()
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default: default_permission(),
            tools: HashMap::new(),
        }
    }
}

impl ApprovalConfig {
    /// Convert to the policy the loop enforces.
    pub fn to_policy(&self) -> Result<ApprovalPolicy, ConfigError> {
        let default: ToolPermission = self
            .default
            .parse()
            .map_err(ConfigError::ValidationError)?;
        let mut policy = ApprovalPolicy {
            default,
            overrides: HashMap::new(),
        };
        for (tool, permission) in &self.tools {
            let permission: ToolPermission = permission
                .parse()
                .map_err(|e| ConfigError::ValidationError(format!("approval.tools.{tool}: {e}")))?;
            policy = policy.with_tool(tool.clone(), permission);
        }
        Ok(policy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// "memory" or "file"
    #[serde(default = "default_checkpoint_backend")]
    pub backend: String,

    /// Directory for the file backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

fn default_checkpoint_backend() -> String {
    "file".into()
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: default_checkpoint_backend(),
            dir: None,
        }
    }
}

impl CheckpointConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| LoopgateConfig::config_dir().join("sessions"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Root directory for `file_write`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<String>,

    /// Results returned by `web_search` when the model doesn't say
    #[serde(default = "default_search_results")]
    pub search_max_results: usize,
}

fn default_search_results() -> usize {
    2
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            workspace_dir: None,
            search_max_results: default_search_results(),
        }
    }
}

impl ToolsConfig {
    pub fn resolved_workspace(&self) -> PathBuf {
        self.workspace_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| LoopgateConfig::config_dir().join("workspace"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Case-insensitive terms that block a call when found in its arguments
    #[serde(default)]
    pub blocked_terms: Vec<String>,

    /// Tools the guard applies to (empty = all)
    #[serde(default)]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl LoopgateConfig {
    /// Load configuration from the default path (~/.loopgate/config.toml).
    ///
    /// Environment variables override file values:
    /// - `LOOPGATE_MAX_TURNS`
    /// - `LOOPGATE_APPROVAL` (default permission)
    /// - `LOOPGATE_CHECKPOINT_DIR`
    /// - `LOOPGATE_WORKSPACE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(turns) = var("LOOPGATE_MAX_TURNS") {
            self.loop_settings.max_turns = turns.parse().map_err(|_| {
                ConfigError::ValidationError(format!("LOOPGATE_MAX_TURNS is not a number: {turns}"))
            })?;
        }
        if let Some(permission) = var("LOOPGATE_APPROVAL") {
            self.approval.default = permission;
        }
        if let Some(dir) = var("LOOPGATE_CHECKPOINT_DIR") {
            self.checkpoint.dir = Some(dir);
        }
        if let Some(dir) = var("LOOPGATE_WORKSPACE") {
            self.tools.workspace_dir = Some(dir);
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".loopgate")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.loop_settings.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "loop.max_turns must be at least 1".into(),
            ));
        }

        if !matches!(self.loop_settings.on_denial.as_str(), "continue" | "stop") {
            return Err(ConfigError::ValidationError(format!(
                "loop.on_denial must be \"continue\" or \"stop\", got \"{}\"",
                self.loop_settings.on_denial
            )));
        }

        if !matches!(self.checkpoint.backend.as_str(), "memory" | "file") {
            return Err(ConfigError::ValidationError(format!(
                "checkpoint.backend must be \"memory\" or \"file\", got \"{}\"",
                self.checkpoint.backend
            )));
        }

        self.approval.to_policy()?;
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for LoopgateConfig {
    fn default() -> Self {
        Self {
            loop_settings: LoopSettings::default(),
            approval: ApprovalConfig::default(),
            checkpoint: CheckpointConfig::default(),
            tools: ToolsConfig::default(),
            guard: GuardConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = LoopgateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.loop_settings.max_turns, 10);
        assert_eq!(config.approval.default, "ask");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = LoopgateConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: LoopgateConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.loop_settings.max_turns, config.loop_settings.max_turns);
        assert_eq!(parsed.checkpoint.backend, config.checkpoint.backend);
    }

    #[test]
    fn zero_max_turns_rejected() {
        let mut config = LoopgateConfig::default();
        config.loop_settings.max_turns = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_permission_rejected() {
        let mut config = LoopgateConfig::default();
        config.approval.tools.insert("web_search".into(), "sometimes".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("web_search"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = LoopgateConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().checkpoint.backend, "file");
    }

    #[test]
    fn parses_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[loop]
max_turns = 4
streaming = true
on_denial = "stop"

[approval]
default = "allow"
[approval.tools]
file_write = "ask"
publish_message = "deny"

[checkpoint]
backend = "memory"

[guard]
blocked_terms = ["password"]
tools = ["file_write"]
"#,
        )
        .unwrap();

        let config = LoopgateConfig::load_from(&path).unwrap();
        assert_eq!(config.loop_settings.max_turns, 4);
        assert!(config.loop_settings.streaming);
        assert_eq!(config.loop_settings.on_denial, "stop");
        assert_eq!(config.guard.blocked_terms, vec!["password".to_string()]);

        let policy = config.approval.to_policy().unwrap();
        assert_eq!(policy.permission_for("web_search"), ToolPermission::Allow);
        assert_eq!(policy.permission_for("file_write"), ToolPermission::Ask);
        assert_eq!(policy.permission_for("publish_message"), ToolPermission::Deny);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[loop\nmax_turns = ").unwrap();
        assert!(matches!(
            LoopgateConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = LoopgateConfig::default();
        let env: HashMap<&str, &str> = [
            ("LOOPGATE_MAX_TURNS", "3"),
            ("LOOPGATE_APPROVAL", "allow"),
            ("LOOPGATE_CHECKPOINT_DIR", "/tmp/lg-sessions"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.loop_settings.max_turns, 3);
        assert_eq!(config.approval.default, "allow");
        assert_eq!(config.checkpoint.resolved_dir(), PathBuf::from("/tmp/lg-sessions"));
    }

    #[test]
    fn bad_env_number_rejected() {
        let mut config = LoopgateConfig::default();
        let result = config.apply_env(|key| {
            (key == "LOOPGATE_MAX_TURNS").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = LoopgateConfig::default_toml();
        assert!(toml_str.contains("max_turns = 10"));
        assert!(toml_str.contains("[approval]"));
    }
}
