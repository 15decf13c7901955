//! Runtime configuration loading.
//!
//! The file lives at `~/.pulse/config.toml`. A missing file means defaults;
//! a malformed file is an error so typos are not silently ignored.
//! `FileConfig` mirrors the TOML; `EngineConfig` is the validated form with
//! compiled patterns that the scanners and classifier consume.

use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PulseError, Result};

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".pulse/config.toml";
const DEFAULT_DESCRIPTOR_DIR: &str = "~/.claude/shell-snapshots";
// Idle threshold scales with the poll interval: CPU-seconds per interval-second.
const IDLE_THRESHOLD_PER_INTERVAL_SEC: f64 = 0.06;

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DescriptorFileConfig {
    #[serde(default = "default_descriptor_dir")]
    pub directory: String,
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,
    #[serde(default = "default_max_prefix_bytes")]
    pub max_prefix_bytes: usize,
}

impl Default for DescriptorFileConfig {
    fn default() -> Self {
        Self {
            directory: default_descriptor_dir(),
            freshness_secs: default_freshness_secs(),
            max_prefix_bytes: default_max_prefix_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessFileConfig {
    #[serde(default = "default_executable_pattern")]
    pub executable_pattern: String,
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

impl Default for ProcessFileConfig {
    fn default() -> Self {
        Self {
            executable_pattern: default_executable_pattern(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_remote_command_pattern")]
    pub command_pattern: String,
}

impl Default for RemoteFileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command_pattern: default_remote_command_pattern(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierFileConfig {
    #[serde(default)]
    pub cpu_delta_idle_threshold: Option<f64>,
    #[serde(default = "default_idle_confirm_polls")]
    pub idle_confirm_polls: u32,
    #[serde(default = "default_min_busy_duration_ms")]
    pub min_busy_duration_ms: u64,
}

impl Default for ClassifierFileConfig {
    fn default() -> Self {
        Self {
            cpu_delta_idle_threshold: None,
            idle_confirm_polls: default_idle_confirm_polls(),
            min_busy_duration_ms: default_min_busy_duration_ms(),
        }
    }
}

/// On-disk configuration, one table per concern.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub descriptors: DescriptorFileConfig,
    #[serde(default)]
    pub process: ProcessFileConfig,
    #[serde(default)]
    pub remote: RemoteFileConfig,
    #[serde(default)]
    pub classifier: ClassifierFileConfig,
}

fn default_interval_secs() -> u64 {
    5
}

fn default_command_timeout_ms() -> u64 {
    3_000
}

fn default_descriptor_dir() -> String {
    DEFAULT_DESCRIPTOR_DIR.to_string()
}

fn default_freshness_secs() -> u64 {
    120
}

fn default_max_prefix_bytes() -> usize {
    64 * 1024
}

fn default_executable_pattern() -> String {
    r"(^|/)claude$|claude-code/cli\.js$".to_string()
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        r"Claude\.app".to_string(),
        r"Claude Helper".to_string(),
        r"pulse-daemon".to_string(),
    ]
}

fn default_remote_command_pattern() -> String {
    r"^ssh$".to_string()
}

fn default_true() -> bool {
    true
}

fn default_idle_confirm_polls() -> u32 {
    6
}

fn default_min_busy_duration_ms() -> u64 {
    30_000
}

// ═══════════════════════════════════════════════════════════════════════════════
// Validated Engine Config
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct DescriptorScanConfig {
    pub directory: PathBuf,
    pub freshness: Duration,
    pub max_prefix_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct ProcessScanConfig {
    pub executable_pattern: Regex,
    pub exclude_patterns: Vec<Regex>,
}

#[derive(Debug, Clone)]
pub struct RemoteScanConfig {
    pub enabled: bool,
    pub command_pattern: Regex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    pub cpu_delta_idle_threshold: f64,
    pub idle_confirm_polls: u32,
    pub min_busy_duration_ms: u64,
}

impl ClassifierConfig {
    /// Defaults tuned for the given poll interval.
    pub fn for_interval(interval: Duration) -> Self {
        Self {
            cpu_delta_idle_threshold: interval.as_secs_f64() * IDLE_THRESHOLD_PER_INTERVAL_SEC,
            idle_confirm_polls: default_idle_confirm_polls(),
            min_busy_duration_ms: default_min_busy_duration_ms(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self::for_interval(Duration::from_secs(default_interval_secs()))
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    pub command_timeout: Duration,
    pub descriptors: DescriptorScanConfig,
    pub process: ProcessScanConfig,
    pub remote: RemoteScanConfig,
    pub classifier: ClassifierConfig,
}

impl EngineConfig {
    /// Validates a file config: compiles patterns, expands `~`, resolves the
    /// interval-relative idle threshold.
    pub fn from_file_config(file: &FileConfig) -> Result<Self> {
        if file.poll.interval_secs == 0 {
            return Err(PulseError::InvalidConfig {
                field: "poll.interval_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if file.classifier.idle_confirm_polls == 0 {
            return Err(PulseError::InvalidConfig {
                field: "classifier.idle_confirm_polls".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let poll_interval = Duration::from_secs(file.poll.interval_secs);
        let mut classifier = ClassifierConfig::for_interval(poll_interval);
        if let Some(threshold) = file.classifier.cpu_delta_idle_threshold {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(PulseError::InvalidConfig {
                    field: "classifier.cpu_delta_idle_threshold".to_string(),
                    reason: "must be a non-negative number".to_string(),
                });
            }
            classifier.cpu_delta_idle_threshold = threshold;
        }
        classifier.idle_confirm_polls = file.classifier.idle_confirm_polls;
        classifier.min_busy_duration_ms = file.classifier.min_busy_duration_ms;

        Ok(Self {
            poll_interval,
            command_timeout: Duration::from_millis(file.poll.command_timeout_ms),
            descriptors: DescriptorScanConfig {
                directory: expand_home(&file.descriptors.directory)?,
                freshness: Duration::from_secs(file.descriptors.freshness_secs),
                max_prefix_bytes: file.descriptors.max_prefix_bytes,
            },
            process: ProcessScanConfig {
                executable_pattern: compile_pattern(&file.process.executable_pattern)?,
                exclude_patterns: file
                    .process
                    .exclude_patterns
                    .iter()
                    .map(|pattern| compile_pattern(pattern))
                    .collect::<Result<Vec<_>>>()?,
            },
            remote: RemoteScanConfig {
                enabled: file.remote.enabled,
                command_pattern: compile_pattern(&file.remote.command_pattern)?,
            },
            classifier,
        })
    }
}

pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| PulseError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(value: &str) -> Result<PathBuf> {
    if value == "~" {
        return dirs::home_dir().ok_or(PulseError::HomeDirNotFound);
    }
    if let Some(rest) = value.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or(PulseError::HomeDirNotFound)?;
        return Ok(home.join(rest));
    }
    Ok(PathBuf::from(value))
}

/// Returns the root directory for pulse data (`~/.pulse`).
pub fn pulse_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(PulseError::HomeDirNotFound)?;
    Ok(home.join(".pulse"))
}

pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(PulseError::HomeDirNotFound)?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_file_config(path: Option<&Path>) -> Result<FileConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "No config file; using defaults");
        return Ok(FileConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| PulseError::Io {
        context: format!("reading config {}", config_path.display()),
        source,
    })?;
    toml::from_str::<FileConfig>(&content).map_err(|err| PulseError::ConfigMalformed {
        path: config_path.clone(),
        details: err.to_string(),
    })
}

/// Loads and validates the engine config in one step.
pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
    EngineConfig::from_file_config(&load_file_config(path)?)
}
