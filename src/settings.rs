//! Configuration management for KMC runs.
//!
//! Run parameters are read from INI-format configuration files. The system supports
//! hierarchical configuration with the following precedence:
//!
//! 1. Local configuration (`./okmc_config.cfg`)
//! 2. User configuration (`~/.config/okmc/okmc_config.cfg`)
//! 3. System configuration (`/etc/okmc/okmc_config.cfg`)
//! 4. Built-in defaults
//!
//! Each file only needs to name the values it changes; everything else keeps the
//! value of the lower-priority layer.
//!
//! # Configuration File Format
//!
//! ```ini
//! [kmc]
//! search_limit = 10
//! temperature = 0.025
//! overlap_policy = skip
//! seed = 1234
//!
//! [cluster]
//! workers = 8
//! work_dir = /scratch/run1
//! poll_interval = 20
//! worker_deadline = 86400
//!
//! [logging]
//! level = info
//! file_logging = false
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use okmc::settings::{init_logging, SettingsManager};
//!
//! # fn main() -> Result<(), okmc::settings::ConfigError> {
//! let manager = SettingsManager::load()?;
//! init_logging(manager.logging())?;
//! println!("{} workers", manager.cluster().workers);
//! # Ok(())
//! # }
//! ```

use crate::config::{ClusterConfig, KmcConfig};
use configparser::ini::Ini;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Name of the configuration file at every level of the hierarchy.
pub const CONFIG_FILE_NAME: &str = "okmc_config.cfg";

type Section = HashMap<String, Option<String>>;

/// Errors that can occur during configuration loading and processing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error when reading configuration files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// INI parsing error
    #[error("INI parsing error: {0}")]
    IniParse(String),
    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
    /// The global logger could not be installed
    #[error("Logger initialization failed: {0}")]
    Logger(String),
}

/// Main configuration structure containing all run settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Search, rate and descent parameters
    pub kmc: KmcConfig,
    /// Worker protocol parameters
    pub cluster: ClusterConfig,
    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Logging configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (default: "info")
    pub level: String,
    /// Send log records to `log_file` instead of stdout (default: false)
    pub file_logging: bool,
    /// Log file used when `file_logging` is enabled (default: "okmc_debug.log")
    pub log_file: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: false,
            log_file: "okmc_debug.log".to_string(),
        }
    }
}

/// Configuration manager that handles loading and accessing run settings.
pub struct SettingsManager {
    settings: Settings,
    config_source: String,
}

impl SettingsManager {
    /// Loads configuration from the standard locations.
    ///
    /// Files that exist but cannot be parsed are skipped with a warning, so one bad
    /// system file does not stop a run configured locally.
    pub fn load() -> Result<Self, ConfigError> {
        let mut candidates = Vec::new();
        candidates.extend(Self::get_system_config_path());
        candidates.extend(Self::get_user_config_path());
        candidates.push(PathBuf::from(CONFIG_FILE_NAME));

        let mut settings = Settings::default();
        let mut config_source = "built-in defaults".to_string();
        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::load_config(path, &settings) {
                Ok(layered) => {
                    settings = layered;
                    config_source = path.display().to_string();
                    debug!("Loaded configuration layer from: {}", path.display());
                }
                Err(e) => {
                    warn!("Failed to load config from {}: {}", path.display(), e);
                }
            }
        }

        info!("Configuration loaded from: {}", config_source);
        Ok(Self {
            settings,
            config_source,
        })
    }

    /// Loads configuration from explicit files, later files overriding earlier ones.
    ///
    /// Unlike [`SettingsManager::load`], every file must exist and parse.
    pub fn load_from_paths(paths: &[&Path]) -> Result<Self, ConfigError> {
        let mut settings = Settings::default();
        let mut config_source = "built-in defaults".to_string();
        for path in paths {
            settings = Self::load_config(path, &settings)?;
            config_source = path.display().to_string();
        }
        Ok(Self {
            settings,
            config_source,
        })
    }

    /// Returns the source of the highest-priority layer that was applied.
    pub fn config_source(&self) -> &str {
        &self.config_source
    }

    /// Gets a reference to the settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Consumes the manager and returns the settings.
    pub fn into_settings(self) -> Settings {
        self.settings
    }

    /// Gets the KMC parameters.
    pub fn kmc(&self) -> &KmcConfig {
        &self.settings.kmc
    }

    /// Gets the worker protocol parameters.
    pub fn cluster(&self) -> &ClusterConfig {
        &self.settings.cluster
    }

    /// Gets the logging settings.
    pub fn logging(&self) -> &LoggingSettings {
        &self.settings.logging
    }

    /// Applies one INI file on top of `base`.
    fn load_config(path: &Path, base: &Settings) -> Result<Settings, ConfigError> {
        let content = fs::read_to_string(path)?;
        let mut ini = Ini::new();
        ini.read(content)
            .map_err(|e| ConfigError::IniParse(format!("Failed to parse INI: {}", e)))?;

        let mut settings = base.clone();
        let map = ini.get_map_ref();

        if let Some(section) = map.get("kmc") {
            Self::parse_kmc(section, &mut settings.kmc)?;
        }
        if let Some(section) = map.get("cluster") {
            Self::parse_cluster(section, &mut settings.cluster)?;
        }
        if let Some(section) = map.get("logging") {
            Self::parse_logging(section, &mut settings.logging)?;
        }

        settings.kmc.validate().map_err(ConfigError::InvalidValue)?;
        settings.cluster.validate().map_err(ConfigError::InvalidValue)?;
        Ok(settings)
    }

    /// Parses the kmc section from INI configuration.
    fn parse_kmc(section: &Section, kmc: &mut KmcConfig) -> Result<(), ConfigError> {
        parse_into(section, "search_limit", &mut kmc.search_limit)?;
        parse_into(section, "max_search_attempts", &mut kmc.max_search_attempts)?;
        parse_into(section, "search_iterations", &mut kmc.search_iterations)?;
        parse_into(section, "minimize_iterations", &mut kmc.minimize_iterations)?;
        parse_into(section, "uniqueness_threshold", &mut kmc.uniqueness_threshold)?;
        parse_into(section, "basin_threshold", &mut kmc.basin_threshold)?;
        parse_into(section, "max_perturbation", &mut kmc.max_perturbation)?;
        parse_into(section, "temperature", &mut kmc.temperature)?;
        parse_into(section, "mass_factor", &mut kmc.mass_factor)?;

        if let Some(Some(policy)) = section.get("overlap_policy") {
            kmc.overlap_policy = policy.parse().map_err(ConfigError::InvalidValue)?;
        }
        if let Some(Some(seed)) = section.get("seed") {
            kmc.seed = match seed.trim() {
                "" | "none" => None,
                value => Some(value.parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("Invalid seed: {}", value))
                })?),
            };
        }
        if let Some(Some(checkpoint)) = section.get("checkpoint_file") {
            let checkpoint = checkpoint.trim();
            kmc.checkpoint_file = if checkpoint.is_empty() {
                None
            } else {
                Some(checkpoint.to_string())
            };
        }
        if let Some(Some(prefix)) = section.get("run_prefix") {
            kmc.run_prefix = prefix.trim().to_string();
        }

        Ok(())
    }

    /// Parses the cluster section from INI configuration.
    fn parse_cluster(section: &Section, cluster: &mut ClusterConfig) -> Result<(), ConfigError> {
        parse_into(section, "workers", &mut cluster.workers)?;
        parse_into(section, "poll_interval", &mut cluster.poll_interval_secs)?;
        parse_into(section, "worker_deadline", &mut cluster.worker_deadline_secs)?;
        if let Some(Some(work_dir)) = section.get("work_dir") {
            cluster.work_dir = work_dir.trim().to_string();
        }
        Ok(())
    }

    /// Parses the logging section from INI configuration.
    fn parse_logging(section: &Section, logging: &mut LoggingSettings) -> Result<(), ConfigError> {
        if let Some(Some(level)) = section.get("level") {
            level.parse::<log::LevelFilter>().map_err(|_| {
                ConfigError::InvalidValue(format!("Invalid log level: {}", level))
            })?;
            logging.level = level.trim().to_string();
        }
        parse_into(section, "file_logging", &mut logging.file_logging)?;
        if let Some(Some(log_file)) = section.get("log_file") {
            logging.log_file = log_file.trim().to_string();
        }
        Ok(())
    }

    /// Gets the system configuration file path.
    fn get_system_config_path() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            Some(PathBuf::from("/etc/okmc").join(CONFIG_FILE_NAME))
        }
        #[cfg(windows)]
        {
            std::env::var("PROGRAMDATA")
                .ok()
                .map(|pd| PathBuf::from(pd).join("okmc").join(CONFIG_FILE_NAME))
        }
    }

    /// Gets the user configuration file path.
    fn get_user_config_path() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            std::env::var("HOME").ok().map(|home| {
                PathBuf::from(home)
                    .join(".config")
                    .join("okmc")
                    .join(CONFIG_FILE_NAME)
            })
        }
        #[cfg(windows)]
        {
            std::env::var("APPDATA")
                .ok()
                .map(|appdata| PathBuf::from(appdata).join("okmc").join(CONFIG_FILE_NAME))
        }
    }
}

impl SettingsManager {
    /// Creates a configuration file listing every option with its default value.
    pub fn create_template(path: &Path) -> Result<(), ConfigError> {
        let template_content = Self::generate_template_content();
        fs::write(path, template_content)?;
        info!("Created settings template at: {}", path.display());
        Ok(())
    }

    /// Generates the content for an okmc_config.cfg template file.
    fn generate_template_content() -> String {
        let kmc = KmcConfig::default();
        let cluster = ClusterConfig::default();
        let logging = LoggingSettings::default();
        let policy = match kmc.overlap_policy {
            crate::config::OverlapPolicy::SkipAttempt => "skip",
            crate::config::OverlapPolicy::AbortStep => "abort",
        };

        format!(
            r#"# OpenKMC Configuration File
#
# Configuration files are loaded in hierarchical order with local settings taking precedence:
#
# 1. Current working directory (./okmc_config.cfg) - highest priority
# 2. User config directory (~/.config/okmc/okmc_config.cfg)
# 3. System config directory (/etc/okmc/okmc_config.cfg)
# 4. Built-in defaults (fallback)
#
# Any missing sections or values keep the value of the layer below.

[kmc]
# Unique saddles collected per step
search_limit = {}

# Search attempts per step before giving up on filling search_limit
max_search_attempts = {}

# Iteration budgets of one saddle search and one minimization
search_iterations = {}
minimize_iterations = {}

# Total squared displacement below which two saddles are the same
uniqueness_threshold = {}

# Total squared displacement up to which a minimum is the starting basin
basin_threshold = {}

# Largest random offset applied to a coordinate before a search
max_perturbation = {}

# Temperature in energy units (k_B T)
temperature = {}

# Divisor of every hTST prefactor ratio
mass_factor = {}

# Configuration overlap during a search reset: skip or abort
overlap_policy = {}

# Random seed; leave empty to seed from entropy
seed =

# JSON checkpoint written after every step; leave empty to disable
checkpoint_file =

# Prefix of step output names
run_prefix =

[cluster]
# Number of worker processes
workers = {}

# Directory shared with the workers
work_dir = {}

# Seconds between two checks of the completion flags
poll_interval = {}

# Seconds to wait for all workers; 0 waits forever
worker_deadline = {}

[logging]
# Log level: off, error, warn, info, debug, trace
level = {}

# Write log records to log_file instead of stdout
file_logging = {}
log_file = {}
"#,
            kmc.search_limit,
            kmc.max_search_attempts,
            kmc.search_iterations,
            kmc.minimize_iterations,
            kmc.uniqueness_threshold,
            kmc.basin_threshold,
            kmc.max_perturbation,
            kmc.temperature,
            kmc.mass_factor,
            policy,
            cluster.workers,
            cluster.work_dir,
            cluster.poll_interval_secs,
            cluster.worker_deadline_secs,
            logging.level,
            logging.file_logging,
            logging.log_file,
        )
    }
}

/// Parses `key` into `target` if the section sets it.
fn parse_into<T: FromStr>(section: &Section, key: &str, target: &mut T) -> Result<(), ConfigError> {
    if let Some(Some(raw)) = section.get(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("Invalid {}: {}", key, raw)))?;
    }
    Ok(())
}

/// Installs the global logger.
///
/// Uses the `RUST_LOG` environment as a base, the configured level as the filter
/// and millisecond timestamps. Records go to stdout, or to the configured log file
/// when file logging is enabled.
pub fn init_logging(logging: &LoggingSettings) -> Result<(), ConfigError> {
    let level: log::LevelFilter = logging
        .level
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("Invalid log level: {}", logging.level)))?;

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level).format_timestamp_millis();

    if logging.file_logging {
        let file = fs::File::create(&logging.log_file)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    } else {
        builder.target(env_logger::Target::Stdout);
    }

    builder
        .try_init()
        .map_err(|e| ConfigError::Logger(e.to_string()))
}
