//! Run configuration loaded from TOML.
//!
//! Every section is optional; missing keys fall back to the defaults shown here.
//!
//! ```toml
//! [discovery]
//! order = "creation-time"      # or "traversal"
//! exclude_names = [".DS_Store", "Thumbs.db"]
//! exclude_patterns = ["archive/**", "*.m3u"]
//! skip_hidden = false
//!
//! [transition]
//! on_collision = "replace"     # or "skip"
//!
//! [revert]
//! reconcile_plain_files = false
//!
//! [logging]
//! file_name = "music_symlink_log.txt"
//! level = "info"
//! ```

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the log file written inside the playlist folder.
pub const DEFAULT_LOG_FILE_NAME: &str = "music_symlink_log.txt";

/// Errors that can occur while loading or compiling configuration.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax or structure.
    ConfigInvalid(String),
    /// A glob in `exclude_patterns` failed to compile.
    InvalidGlobPattern { pattern: String, reason: String },
    /// IO error while reading configuration.
    IoError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ConfigNotFound(path) => {
                write!(f, "Configuration file not found: {}", path.display())
            }
            ConfigError::ConfigInvalid(msg) => write!(f, "Invalid configuration: {}", msg),
            ConfigError::InvalidGlobPattern { pattern, reason } => {
                write!(f, "Invalid glob pattern '{}': {}", pattern, reason)
            }
            ConfigError::IoError(msg) => write!(f, "IO error reading configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Order in which discovered files are handed to the transition engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OrderPolicy {
    /// Whatever order the directory listing yields.
    Traversal,
    /// Oldest file first; ties keep traversal order.
    #[default]
    CreationTime,
}

/// What to do when the repository already holds a file with the candidate's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    /// The incoming file replaces the repository copy.
    #[default]
    Replace,
    /// Leave the candidate where it is and report it as failed.
    Skip,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub transition: TransitionConfig,
    #[serde(default)]
    pub revert: RevertConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub order: OrderPolicy,
    /// Exact file names that are never candidates.
    #[serde(default)]
    pub exclude_names: Vec<String>,
    /// Globs matched against the path relative to the playlist folder.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub skip_hidden: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionConfig {
    #[serde(default)]
    pub on_collision: CollisionPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevertConfig {
    /// Restore plain playlist files whose repository copy holds the same bytes.
    /// Never applied by the automatic revert after an interrupt.
    #[serde(default)]
    pub reconcile_plain_files: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_file_name")]
    pub file_name: String,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_name: default_log_file_name(),
            level: default_log_level(),
        }
    }
}

fn default_log_file_name() -> String {
    DEFAULT_LOG_FILE_NAME.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Lookup order:
    /// 1. `config_path`, if provided
    /// 2. `.centralinkrc.toml` in the current directory
    /// 3. `~/.config/centralink/config.toml`
    /// 4. built-in defaults
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is found (or explicitly named) but
    /// cannot be read or parsed.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(".centralinkrc.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Ok(home) = std::env::var("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("centralink")
                .join("config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        Ok(Self::default())
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Compile the discovery section into the matcher used during the walk.
    ///
    /// The log file name is always excluded, whatever the exclusion lists say.
    pub fn discovery_rules(&self) -> Result<DiscoveryRules, ConfigError> {
        DiscoveryRules::new(&self.discovery, &self.logging.file_name)
    }
}

/// Precompiled exclusion rules applied to every file the walk yields.
#[derive(Debug, Clone)]
pub struct DiscoveryRules {
    reserved_name: String,
    skip_hidden: bool,
    exclude_names: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
}

impl DiscoveryRules {
    fn new(config: &DiscoveryConfig, reserved_name: &str) -> Result<Self, ConfigError> {
        let exclude_patterns = config
            .exclude_patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|e| ConfigError::InvalidGlobPattern {
                    pattern: pattern.clone(),
                    reason: e.msg.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            reserved_name: reserved_name.to_string(),
            skip_hidden: config.skip_hidden,
            exclude_names: config.exclude_names.iter().cloned().collect(),
            exclude_patterns,
        })
    }

    /// Rules that only exclude the given reserved log name.
    pub fn reserved_only(reserved_name: &str) -> Self {
        Self {
            reserved_name: reserved_name.to_string(),
            skip_hidden: false,
            exclude_names: HashSet::new(),
            exclude_patterns: Vec::new(),
        }
    }

    /// Whether a file at `relative_path` (relative to the playlist folder) is a candidate.
    pub fn accepts(&self, relative_path: &Path) -> bool {
        let file_name = relative_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if file_name == self.reserved_name.as_str() {
            return false;
        }

        if self.skip_hidden && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_names.contains(file_name.as_ref()) {
            return false;
        }

        !self
            .exclude_patterns
            .iter()
            .any(|pattern| pattern.matches_path(relative_path))
    }
}

impl Default for DiscoveryRules {
    fn default() -> Self {
        Self::reserved_only(DEFAULT_LOG_FILE_NAME)
    }
}
