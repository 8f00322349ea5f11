use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration loaded from `~/.mindfleet/config.toml`.
///
/// Every section falls back to its defaults, so a partial file (or no file
/// at all) is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub task: TaskConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

impl Config {
    /// Load config from `~/.mindfleet/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fleet.validate()?;
        self.task.validate()?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mindfleet")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

/// How the supervisor builds and babysits the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Profiles launched when no multi-agent task overrides them.
    #[serde(default = "default_profiles")]
    pub profiles: Vec<PathBuf>,
    #[serde(default)]
    pub load_memory: bool,
    #[serde(default)]
    pub init_message: Option<String>,
    /// Template cloned once per agent name for multi-agent tasks.
    #[serde(default = "default_multiagent_template")]
    pub multiagent_template: PathBuf,
    /// Where materialized profiles are written.
    #[serde(default = "default_profile_dir")]
    pub profile_dir: PathBuf,
    #[serde(default = "default_launch_stagger_ms")]
    pub launch_stagger_ms: u64,
    /// A worker that crashes sooner than this after (re)starting is retired.
    #[serde(default = "default_min_uptime_secs")]
    pub min_uptime_secs: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            profiles: default_profiles(),
            load_memory: false,
            init_message: None,
            multiagent_template: default_multiagent_template(),
            profile_dir: default_profile_dir(),
            launch_stagger_ms: default_launch_stagger_ms(),
            min_uptime_secs: default_min_uptime_secs(),
        }
    }
}

impl FleetConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.profiles.is_empty() {
            return Err(ConfigError::Validation(
                "fleet.profiles must list at least one profile".to_string(),
            ));
        }
        Ok(())
    }

    pub fn launch_stagger(&self) -> Duration {
        Duration::from_millis(self.launch_stagger_ms)
    }

    pub fn min_uptime(&self) -> Duration {
        Duration::from_secs(self.min_uptime_secs)
    }
}

fn default_profiles() -> Vec<PathBuf> {
    vec![PathBuf::from("./andy.json")]
}
fn default_multiagent_template() -> PathBuf {
    PathBuf::from("./multiagent_prompt_desc.json")
}
fn default_profile_dir() -> PathBuf {
    PathBuf::from("./profiles")
}
fn default_launch_stagger_ms() -> u64 {
    1_000
}
fn default_min_uptime_secs() -> u64 {
    10
}

/// Timing knobs for per-agent task setup and completion polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_readiness_window_secs")]
    pub readiness_window_secs: u64,
    #[serde(default = "default_readiness_poll_ms")]
    pub readiness_poll_ms: u64,
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,
    #[serde(default = "default_settle_poll_ms")]
    pub settle_poll_ms: u64,
    #[serde(default = "default_move_settle_ms")]
    pub move_settle_ms: u64,
    /// Half-width of the random horizontal offset applied after the move.
    #[serde(default = "default_spread_radius")]
    pub spread_radius: i32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            readiness_window_secs: default_readiness_window_secs(),
            readiness_poll_ms: default_readiness_poll_ms(),
            settle_timeout_ms: default_settle_timeout_ms(),
            settle_poll_ms: default_settle_poll_ms(),
            move_settle_ms: default_move_settle_ms(),
            spread_radius: default_spread_radius(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TaskConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "task.default_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.readiness_poll_ms == 0 || self.settle_poll_ms == 0 || self.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "task poll intervals must be greater than zero".to_string(),
            ));
        }
        if self.spread_radius < 0 {
            return Err(ConfigError::Validation(
                "task.spread_radius must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_timeout_secs() -> u64 {
    300
}
fn default_readiness_window_secs() -> u64 {
    10
}
fn default_readiness_poll_ms() -> u64 {
    1_000
}
fn default_settle_timeout_ms() -> u64 {
    2_000
}
fn default_settle_poll_ms() -> u64 {
    100
}
fn default_move_settle_ms() -> u64 {
    200
}
fn default_spread_radius() -> i32 {
    5
}
fn default_poll_interval_ms() -> u64 {
    1_000
}

/// The decision-loop runtime each worker hosts as a child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Program followed by its arguments.
    #[serde(default = "default_runtime_command")]
    pub command: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command: default_runtime_command(),
        }
    }
}

fn default_runtime_command() -> Vec<String> {
    vec!["node".into(), "src/process/runtime.js".into()]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Base URL of the dashboard relay; registration is skipped when unset.
    #[serde(default)]
    pub url: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
