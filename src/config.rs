/*!
 * Deployment configuration
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SiteError};

/// Name of the per-project configuration file
pub const CONFIG_FILE_NAME: &str = "sitesync.toml";

/// Main configuration for a deploy run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployConfig {
    /// Files hashed concurrently per batch
    #[serde(default = "default_batch_size")]
    pub hash_batch_size: usize,

    /// Files uploaded concurrently per batch
    #[serde(default = "default_batch_size")]
    pub upload_batch_size: usize,

    /// Upper bound on mutations in one ledger transaction
    #[serde(default = "default_max_mutations")]
    pub max_mutations_per_transaction: usize,

    /// Fail the scan on the first rejected path instead of skipping it
    #[serde(default)]
    pub strict_paths: bool,

    /// Ignore files to look for at the project root, in priority order
    #[serde(default = "default_ignore_files")]
    pub ignore_files: Vec<String>,

    /// Follow symbolic links while scanning
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Scan, fetch and diff without uploading or committing
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Write JSON logs to this file instead of stdout
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Shorthand for debug level
    #[serde(default)]
    pub verbose: bool,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            hash_batch_size: default_batch_size(),
            upload_batch_size: default_batch_size(),
            max_mutations_per_transaction: default_max_mutations(),
            strict_paths: false,
            ignore_files: default_ignore_files(),
            follow_symlinks: false,
            dry_run: false,
            logging: LoggingConfig::default(),
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_batch_size() -> usize {
    10
}

fn default_max_mutations() -> usize {
    100
}

fn default_ignore_files() -> Vec<String> {
    vec![".sitesignore".to_string(), ".gitignore".to_string()]
}

impl DeployConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SiteError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: DeployConfig = toml::from_str(&contents).map_err(|e| {
            SiteError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `sitesync.toml` from the project root, or fall back to defaults
    pub fn discover(project_root: &Path) -> Result<Self> {
        let candidate = project_root.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| SiteError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents).map_err(|e| {
            SiteError::Config(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.hash_batch_size == 0 {
            return Err(SiteError::Config("hash_batch_size must be at least 1".to_string()));
        }
        if self.upload_batch_size == 0 {
            return Err(SiteError::Config(
                "upload_batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_mutations_per_transaction == 0 {
            return Err(SiteError::Config(
                "max_mutations_per_transaction must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Names of ignore files; these are never published
    pub fn is_ignore_file_name(&self, name: &str) -> bool {
        self.ignore_files.iter().any(|f| f == name)
    }

    /// Root-level files that configure the deploy and are never published
    pub fn is_project_file_name(&self, name: &str) -> bool {
        name == CONFIG_FILE_NAME || self.is_ignore_file_name(name)
    }
}
