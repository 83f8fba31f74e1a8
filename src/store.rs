//! Keyed persistence for configurations and energy records.
//!
//! The engine never holds on to saddle or minimum configurations between phases;
//! it saves them under a name and reloads them when needed, the same way workers
//! in other processes see them. Two implementations are provided:
//!
//! - [`FileStore`]: a directory, configurations as `<name>.pos`, energy records as `<name>`
//! - [`MemoryStore`]: an in-process map, useful for single-process runs and tests

use crate::geometry::Configuration;
use crate::io::{self, EnergyRecord};
use log::debug;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extension used for configuration files.
pub const POSITIONS_EXTENSION: &str = "pos";

/// Errors raised by configuration stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O error while reading or writing a stored item
    #[error("IO error on '{name}': {source}")]
    Io {
        /// Store key of the item
        name: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The item does not exist
    #[error("'{0}' not found in store")]
    NotFound(String),
    /// The item exists but could not be parsed
    #[error("malformed '{name}': {reason}")]
    Malformed {
        /// Store key of the item
        name: String,
        /// Parser message
        reason: String,
    },
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Load/save access to named configurations and energy records.
pub trait ConfigurationStore {
    /// Loads the configuration saved under `name`.
    fn load(&self, name: &str) -> Result<Configuration>;

    /// Saves `config` under `name`, replacing any previous content.
    fn save(&self, name: &str, config: &Configuration) -> Result<()>;

    /// Loads the energy record saved under `name`.
    fn load_record(&self, name: &str) -> Result<EnergyRecord>;

    /// Saves `record` under `name`, replacing any previous content.
    fn save_record(&self, name: &str, record: &EnergyRecord) -> Result<()>;

    /// Removes the configuration and the energy record saved under `name`.
    ///
    /// Removing something that does not exist is not an error.
    fn remove(&self, name: &str) -> Result<()>;
}

/// Directory-backed store shared with external worker processes.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|source| StoreError::Io {
            name: root.display().to_string(),
            source,
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Directory holding the stored files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the configuration file for `name`.
    pub fn configuration_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, POSITIONS_EXTENSION))
    }

    /// Path of the energy record file for `name`.
    pub fn record_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn read(&self, name: &str, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(name.to_string())
            } else {
                StoreError::Io {
                    name: name.to_string(),
                    source,
                }
            }
        })
    }

    fn write(&self, name: &str, path: &Path, content: String) -> Result<()> {
        debug!("Writing {}", path.display());
        fs::write(path, content).map_err(|source| StoreError::Io {
            name: name.to_string(),
            source,
        })
    }

    fn remove_path(&self, name: &str, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }
}

impl ConfigurationStore for FileStore {
    fn load(&self, name: &str) -> Result<Configuration> {
        let content = self.read(name, &self.configuration_path(name))?;
        io::parse_positions(&content).map_err(|reason| StoreError::Malformed {
            name: name.to_string(),
            reason,
        })
    }

    fn save(&self, name: &str, config: &Configuration) -> Result<()> {
        self.write(name, &self.configuration_path(name), io::format_positions(config))
    }

    fn load_record(&self, name: &str) -> Result<EnergyRecord> {
        let content = self.read(name, &self.record_path(name))?;
        io::parse_energy_record(&content).map_err(|reason| StoreError::Malformed {
            name: name.to_string(),
            reason,
        })
    }

    fn save_record(&self, name: &str, record: &EnergyRecord) -> Result<()> {
        self.write(name, &self.record_path(name), io::format_energy_record(record))
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.remove_path(name, &self.configuration_path(name))?;
        self.remove_path(name, &self.record_path(name))
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    configurations: RefCell<HashMap<String, Configuration>>,
    records: RefCell<HashMap<String, EnergyRecord>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a configuration is saved under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.configurations.borrow().contains_key(name)
    }

    /// Number of saved configurations.
    pub fn len(&self) -> usize {
        self.configurations.borrow().len()
    }

    /// Returns `true` if no configuration is saved.
    pub fn is_empty(&self) -> bool {
        self.configurations.borrow().is_empty()
    }
}

impl ConfigurationStore for MemoryStore {
    fn load(&self, name: &str) -> Result<Configuration> {
        self.configurations
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn save(&self, name: &str, config: &Configuration) -> Result<()> {
        self.configurations
            .borrow_mut()
            .insert(name.to_string(), config.clone());
        Ok(())
    }

    fn load_record(&self, name: &str) -> Result<EnergyRecord> {
        self.records
            .borrow()
            .get(name)
            .copied()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn save_record(&self, name: &str, record: &EnergyRecord) -> Result<()> {
        self.records.borrow_mut().insert(name.to_string(), *record);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.configurations.borrow_mut().remove(name);
        self.records.borrow_mut().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Configuration {
        Configuration::from_flat(&[0.0, 0.1, 0.2, 1.0 / 3.0, -2.5, 7.25])
    }

    #[test]
    fn test_file_store_configuration() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.save("3_saddle", &sample()).unwrap();
        assert!(dir.path().join("3_saddle.pos").exists());
        assert_eq!(store.load("3_saddle").unwrap(), sample());
    }

    #[test]
    fn test_file_store_record() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let record = EnergyRecord {
            energy: -12.5,
            vibrational_prefactor: 3.0e12,
        };

        store.save_record("s_0_ev", &record).unwrap();
        assert_eq!(store.load_record("s_0_ev").unwrap(), record);
    }

    #[test]
    fn test_file_store_missing_and_malformed() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert!(matches!(store.load("nope"), Err(StoreError::NotFound(_))));

        fs::write(dir.path().join("bad_ev"), "not-a-number\n1.0\n").unwrap();
        assert!(matches!(
            store.load_record("bad_ev"),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn test_file_store_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.save("x", &sample()).unwrap();
        store.remove("x").unwrap();
        store.remove("x").unwrap();
        assert!(!store.configuration_path("x").exists());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.save("0", &sample()).unwrap();
        assert!(store.contains("0"));
        assert_eq!(store.load("0").unwrap(), sample());

        store.remove("0").unwrap();
        assert!(matches!(store.load("0"), Err(StoreError::NotFound(_))));
    }
}
