//! # fsverify-config
//!
//! Configuration management for fsverify.
//!
//! Loads configuration from:
//! 1. `~/.fsverify/config.toml` (global)
//! 2. `.fsverify/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! There is no process-wide instance: callers load a [`Config`] once and pass
//! it (or its [`FileConfig`] section) explicitly to whatever needs it.

pub mod logging;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Largest size exponent accepted; keeps `2^bits + jitter` far from u64 overflow.
pub const MAX_SIZE_BITS_LIMIT: u32 = 40;

pub const ENV_MIN_SIZE_BITS: &str = "FSVERIFY_MIN_SIZE_BITS";
pub const ENV_MAX_SIZE_BITS: &str = "FSVERIFY_MAX_SIZE_BITS";
pub const ENV_IMMEDIATE_CHECK: &str = "FSVERIFY_IMMEDIATE_CHECK";
pub const ENV_THREADS: &str = "FSVERIFY_THREADS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub files: FileConfig,
    pub run: RunConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let config = Self::load_layers()?;
        config.validate()?;
        Ok(config)
    }

    /// Global file, project file and environment, merged but not validated.
    ///
    /// For callers that layer further overrides before calling [`Config::validate`].
    pub fn load_layers() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let mut config = Self::load_from(global.as_deref(), Path::new(".fsverify/config.toml"))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load and merge the two config files without consulting the environment.
    ///
    /// Missing files are skipped; a file that exists but fails to parse is an error.
    pub fn load_from(global: Option<&Path>, project: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = global {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        if project.exists() {
            debug!("Loading project config from {:?}", project);
            let contents = std::fs::read_to_string(project)?;
            let project_config: PartialConfig = toml::from_str(&contents)?;
            config.merge(project_config);
        }

        Ok(config)
    }

    /// Global config path: ~/.fsverify/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".fsverify/config.toml"))
    }

    /// Project keys override global ones only where they are actually present.
    fn merge(&mut self, other: PartialConfig) {
        if let Some(files) = other.files {
            if let Some(v) = files.min_size_bits {
                self.files.min_size_bits = v;
            }
            if let Some(v) = files.max_size_bits {
                self.files.max_size_bits = v;
            }
            if let Some(v) = files.immediate_check {
                self.files.immediate_check = v;
            }
        }
        if let Some(run) = other.run {
            if run.threads.is_some() {
                self.run.threads = run.threads;
            }
            if let Some(v) = run.files_per_worker {
                self.run.files_per_worker = v;
            }
            if let Some(v) = run.passes {
                self.run.passes = v;
            }
        }
    }

    /// Apply environment variable overrides.
    ///
    /// `lookup` abstracts `std::env::var` so tests need not mutate the process environment.
    /// Unparseable values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bits) = lookup(ENV_MIN_SIZE_BITS).and_then(|v| v.parse().ok()) {
            self.files.min_size_bits = bits;
        }
        if let Some(bits) = lookup(ENV_MAX_SIZE_BITS).and_then(|v| v.parse().ok()) {
            self.files.max_size_bits = bits;
        }
        if let Some(flag) = lookup(ENV_IMMEDIATE_CHECK).and_then(|v| parse_bool(&v)) {
            self.files.immediate_check = flag;
        }
        if let Some(threads) = lookup(ENV_THREADS).and_then(|v| v.parse().ok()) {
            self.run.threads = Some(threads);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.files.validate()?;
        if self.run.threads == Some(0) {
            return Err(ConfigError::Invalid("run.threads must be at least 1".into()));
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        Config::default().to_toml()
    }

    pub fn to_toml(&self) -> String {
        // Plain structs of integers and booleans always serialize.
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Per-file parameters read by test file construction and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Smallest power-of-two exponent for a file's target size
    pub min_size_bits: u32,
    /// Largest power-of-two exponent for a file's target size
    pub max_size_bits: u32,
    /// Verify every file right after writing it
    pub immediate_check: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            min_size_bits: 10,
            max_size_bits: 20,
            immediate_check: false,
        }
    }
}

impl FileConfig {
    pub fn new(min_size_bits: u32, max_size_bits: u32, immediate_check: bool) -> Self {
        Self {
            min_size_bits,
            max_size_bits,
            immediate_check,
        }
    }

    pub fn min_size_bits(&self) -> u32 {
        self.min_size_bits
    }

    pub fn max_size_bits(&self) -> u32 {
        self.max_size_bits
    }

    pub fn immediate_check(&self) -> bool {
        self.immediate_check
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_size_bits > self.max_size_bits {
            return Err(ConfigError::Invalid(format!(
                "files.min_size_bits ({}) is larger than files.max_size_bits ({})",
                self.min_size_bits, self.max_size_bits
            )));
        }
        if self.max_size_bits > MAX_SIZE_BITS_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "files.max_size_bits ({}) exceeds the limit of {}",
                self.max_size_bits, MAX_SIZE_BITS_LIMIT
            )));
        }
        Ok(())
    }
}

/// Reference driver parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of worker threads (None = auto)
    pub threads: Option<usize>,
    /// Files each worker creates in its own directory
    pub files_per_worker: usize,
    /// Verification rounds over every file before deletion
    pub passes: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threads: None,
            files_per_worker: 64,
            passes: 3,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    files: Option<PartialFileConfig>,
    run: Option<PartialRunConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialFileConfig {
    min_size_bits: Option<u32>,
    max_size_bits: Option<u32>,
    immediate_check: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialRunConfig {
    threads: Option<usize>,
    files_per_worker: Option<usize>,
    passes: Option<usize>,
}
