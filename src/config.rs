//! Freecall Configuration
//!
//! Handles parsing of `freecall.toml`. Every section is optional; a missing
//! file yields the defaults.
//!
//! ```toml
//! [loader]
//! search_paths = ["/opt/mylibs"]
//! default_flags = ["now", "global"]
//!
//! [logging]
//! filter = "freecall=info"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ffi::{default_search_paths, Loader, OpenFlags};

/// Name of the configuration file searched for
pub const CONFIG_FILE: &str = "freecall.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Unknown open flag '{0}' (expected now, lazy, global or local)")]
    InvalidFlag(String),

    #[error("Open flags [{0}] must name exactly one of now or lazy")]
    BindingMode(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching freecall.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FreecallConfig {
    #[serde(default)]
    pub loader: LoaderConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FreecallConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: FreecallConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Library search and `dlopen` defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Directories searched before the platform defaults
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,

    /// Flags for libraries opened by short name
    #[serde(default = "default_flags")]
    pub default_flags: Vec<String>,
}

fn default_flags() -> Vec<String> {
    vec!["now".to_string(), "global".to_string()]
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            default_flags: default_flags(),
        }
    }
}

impl LoaderConfig {
    /// Combined open flags; an empty list means [`OpenFlags::default`]
    pub fn open_flags(&self) -> ConfigResult<OpenFlags> {
        let mut names = self.default_flags.iter();
        let Some(first) = names.next() else {
            return Ok(OpenFlags::default());
        };
        let parse = |name: &String| {
            OpenFlags::parse(name).ok_or_else(|| ConfigError::InvalidFlag(name.clone()))
        };
        let flags = names.try_fold(parse(first)?, |flags, name| Ok::<OpenFlags, ConfigError>(flags | parse(name)?))?;
        if !flags.has_binding_mode() {
            return Err(ConfigError::BindingMode(self.default_flags.join(", ")));
        }
        Ok(flags)
    }

    /// Configured directories followed by the platform defaults
    pub fn all_search_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.search_paths.clone();
        paths.extend(default_search_paths());
        paths
    }

    /// A loader searching [`LoaderConfig::all_search_paths`]
    pub fn build_loader(&self) -> Loader {
        Loader::with_search_paths(self.all_search_paths())
    }
}

/// Log filtering for the command-line tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing-subscriber` filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "freecall=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}
