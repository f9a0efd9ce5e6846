//! Configuration loading, validation, and management for mcp-arena.
//!
//! Loads configuration from `$ARENA_CONFIG` or `~/.mcp-arena/config.toml`
//! with environment variable overrides. Validates all settings at load time,
//! so a run never starts from an invalid configuration.

use arena_telemetry::LogFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Strategy names the factory knows how to build.
pub const KNOWN_STRATEGIES: [&str; 3] = ["react", "reflection", "planning"];

/// The root configuration structure.
///
/// Maps directly to `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Step Engine settings shared by every strategy
    #[serde(default)]
    pub engine: EngineConfig,

    /// ReAct strategy settings
    #[serde(default)]
    pub react: ReactConfig,

    /// Reflection strategy settings
    #[serde(default)]
    pub reflection: ReflectionConfig,

    /// Planning strategy settings
    #[serde(default)]
    pub planning: PlanningConfig,

    /// Router settings
    #[serde(default)]
    pub router: RouterConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per Model Client call timeout
    #[serde(default = "default_model_timeout_ms")]
    pub model_timeout_ms: u64,

    /// Per Tool Registry call timeout
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,

    /// Delay before the single model retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Default max tokens per completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_model_timeout_ms() -> u64 {
    60_000
}
fn default_tool_timeout_ms() -> u64 {
    30_000
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_timeout_ms: default_model_timeout_ms(),
            tool_timeout_ms: default_tool_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactConfig {
    /// Step budget when the task carries none
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Text marker that ends the loop even if tool calls are proposed
    #[serde(default = "default_final_answer_marker")]
    pub final_answer_marker: String,
}

fn default_max_steps() -> u32 {
    10
}
fn default_final_answer_marker() -> String {
    "Final Answer:".into()
}

impl Default for ReactConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            final_answer_marker: default_final_answer_marker(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// Total draft generations allowed (critiques = max_iterations - 1)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    3
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningConfig {
    /// Maximum plan steps executing at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Step budget for each subtask's ReAct run
    #[serde(default = "default_subtask_max_steps")]
    pub subtask_max_steps: u32,
}

fn default_max_parallel() -> usize {
    4
}
fn default_subtask_max_steps() -> u32 {
    5
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            subtask_max_steps: default_subtask_max_steps(),
        }
    }
}

/// Which selection policy the router applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicyKind {
    #[default]
    RuleBased,
    ModelBased,
    FanOut,
}

impl std::str::FromStr for RoutingPolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "rule_based" => Ok(Self::RuleBased),
            "model_based" => Ok(Self::ModelBased),
            "fan_out" => Ok(Self::FanOut),
            other => Err(ConfigError::ValidationError(format!(
                "unknown router policy '{other}'"
            ))),
        }
    }
}

/// A static routing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Strategy selected when the rule matches
    pub strategy: String,

    /// Matches when any keyword occurs in the goal (case-insensitive)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    /// Matches when the task carries this constraint key (and value, if given)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<ConstraintMatch>,

    /// Higher priority rules are checked first
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintMatch {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub policy: RoutingPolicyKind,

    /// Used when no rule matches or the model names an unknown strategy
    #[serde(default = "default_strategy")]
    pub default_strategy: String,

    #[serde(default = "default_rules")]
    pub rules: Vec<RuleConfig>,
}

fn default_strategy() -> String {
    "reflection".into()
}

fn keyword_rule(strategy: &str, keywords: &[&str], priority: i32) -> RuleConfig {
    RuleConfig {
        strategy: strategy.into(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        constraint: None,
        priority,
    }
}

fn default_rules() -> Vec<RuleConfig> {
    vec![
        keyword_rule("planning", &["plan", "step", "goal", "how to"], 1),
        keyword_rule("react", &["do", "execute", "run", "perform", "search"], 0),
    ]
}

/// ReAct step budget used by the research preset for quick lookups.
pub const RESEARCH_REACT_MAX_STEPS: u32 = 5;

impl RouterConfig {
    /// The research preset. Investigations go to planning, quick lookups to
    /// react, and the model picks for anything else.
    pub fn research() -> Self {
        Self {
            policy: RoutingPolicyKind::ModelBased,
            default_strategy: default_strategy(),
            rules: vec![
                keyword_rule("planning", &["research", "analyze", "investigate", "study"], 1),
                keyword_rule("react", &["find", "search", "look up", "what is"], 0),
            ],
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            policy: RoutingPolicyKind::default(),
            default_strategy: default_strategy(),
            rules: default_rules(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".into()
}

impl LoggingConfig {
    /// Install the global subscriber for this configuration.
    ///
    /// Returns `false` if one was already installed.
    pub fn init(&self) -> bool {
        arena_telemetry::init_logging(&self.level, self.format)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl ArenaConfig {
    /// Load configuration from `$ARENA_CONFIG` or the default path, then
    /// apply environment overrides:
    /// - `ARENA_MAX_STEPS`
    /// - `ARENA_ROUTER_POLICY`
    /// - `ARENA_LOG_LEVEL`
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("ARENA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
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

        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(steps) = lookup("ARENA_MAX_STEPS") {
            self.react.max_steps = steps.parse().map_err(|_| {
                ConfigError::ValidationError(format!("ARENA_MAX_STEPS is not a number: {steps}"))
            })?;
        }
        if let Some(policy) = lookup("ARENA_ROUTER_POLICY") {
            self.router.policy = policy.parse()?;
        }
        if let Some(level) = lookup("ARENA_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".mcp-arena")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.engine.temperature) {
            return Err(ConfigError::ValidationError(
                "engine.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.engine.model_timeout_ms == 0 || self.engine.tool_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "engine timeouts must be greater than zero".into(),
            ));
        }
        if self.react.final_answer_marker.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "react.final_answer_marker must not be empty".into(),
            ));
        }
        if self.planning.max_parallel == 0 {
            return Err(ConfigError::ValidationError(
                "planning.max_parallel must be at least 1".into(),
            ));
        }
        if !is_known_strategy(&self.router.default_strategy) {
            return Err(ConfigError::ValidationError(format!(
                "router.default_strategy '{}' is not one of {:?}",
                self.router.default_strategy, KNOWN_STRATEGIES
            )));
        }
        for (i, rule) in self.router.rules.iter().enumerate() {
            if !is_known_strategy(&rule.strategy) {
                return Err(ConfigError::ValidationError(format!(
                    "router.rules[{i}] names unknown strategy '{}'",
                    rule.strategy
                )));
            }
            if rule.keywords.iter().all(|k| k.trim().is_empty()) && rule.constraint.is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "router.rules[{i}] needs at least one keyword or a constraint"
                )));
            }
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn is_known_strategy(name: &str) -> bool {
    KNOWN_STRATEGIES.contains(&name)
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
