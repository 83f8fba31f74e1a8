//! Checkpoint system for saving and restarting KMC runs.
//!
//! A checkpoint is a JSON snapshot of the [`KmcState`] after a committed step,
//! together with the [`KmcConfig`] the run used. Controllers write it after every
//! step when `KmcConfig::checkpoint_file` is set, and a run can be resumed from it.
//!
//! # Serialization Strategy
//!
//! nalgebra vectors are not serialized directly; wrapper types convert them to
//! plain arrays:
//!
//! - `SerializableConfiguration`: positions as `Vec<[f64; 3]>`
//! - `SerializableState`: the state with its positions wrapped
//!
//! # Usage
//!
//! ```no_run
//! use okmc::checkpoint::Checkpoint;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), okmc::checkpoint::CheckpointError> {
//! let loaded = Checkpoint::load(Path::new("kmc.chk"))?;
//! println!("resuming at step {}", loaded.state.step_counter);
//! # Ok(())
//! # }
//! ```

use crate::config::KmcConfig;
use crate::geometry::Configuration;
use crate::state::KmcState;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while saving or loading checkpoints.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// File system error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializable wrapper for [`Configuration`].
#[derive(Serialize, Deserialize)]
pub struct SerializableConfiguration {
    positions: Vec<[f64; 3]>,
}

impl From<&Configuration> for SerializableConfiguration {
    fn from(config: &Configuration) -> Self {
        Self {
            positions: config.positions.iter().map(|p| [p.x, p.y, p.z]).collect(),
        }
    }
}

impl From<SerializableConfiguration> for Configuration {
    fn from(ser: SerializableConfiguration) -> Self {
        Configuration::new(
            ser.positions
                .into_iter()
                .map(|[x, y, z]| Vector3::new(x, y, z))
                .collect(),
        )
    }
}

/// Serializable wrapper for [`KmcState`].
#[derive(Serialize, Deserialize)]
pub struct SerializableState {
    positions: SerializableConfiguration,
    minimum_energy: f64,
    minimum_vibrational_prefactor: f64,
    elapsed_time: f64,
    step_counter: usize,
}

impl From<&KmcState> for SerializableState {
    fn from(state: &KmcState) -> Self {
        Self {
            positions: (&state.positions).into(),
            minimum_energy: state.minimum_energy,
            minimum_vibrational_prefactor: state.minimum_vibrational_prefactor,
            elapsed_time: state.elapsed_time,
            step_counter: state.step_counter,
        }
    }
}

impl From<SerializableState> for KmcState {
    fn from(ser: SerializableState) -> Self {
        Self {
            positions: ser.positions.into(),
            minimum_energy: ser.minimum_energy,
            minimum_vibrational_prefactor: ser.minimum_vibrational_prefactor,
            elapsed_time: ser.elapsed_time,
            step_counter: ser.step_counter,
        }
    }
}

/// Snapshot of a run after a committed step.
#[derive(Serialize, Deserialize)]
pub struct Checkpoint {
    /// State after the last committed step
    pub state: SerializableState,
    /// Run configuration
    pub config: KmcConfig,
}

/// Loaded checkpoint contents returned by [`Checkpoint::load`].
pub struct CheckpointLoad {
    /// State after the last committed step
    pub state: KmcState,
    /// Run configuration
    pub config: KmcConfig,
}

impl Checkpoint {
    /// Create a checkpoint of `state` and `config`.
    pub fn new(state: &KmcState, config: &KmcConfig) -> Self {
        Self {
            state: state.into(),
            config: config.clone(),
        }
    }

    /// Save checkpoint to a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load checkpoint from a JSON file.
    pub fn load(path: &Path) -> Result<CheckpointLoad, CheckpointError> {
        let content = fs::read_to_string(path)?;
        let checkpoint: Checkpoint = serde_json::from_str(&content)?;
        Ok(CheckpointLoad {
            state: checkpoint.state.into(),
            config: checkpoint.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_checkpoint_restores_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kmc.chk");

        let mut state = KmcState::new(
            Configuration::from_flat(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]),
            -7.5,
            1.25e13,
        );
        state.elapsed_time = 3.5e-9;
        state.step_counter = 17;
        let config = KmcConfig {
            search_limit: 4,
            ..KmcConfig::default()
        };

        Checkpoint::new(&state, &config).save(&path).unwrap();
        let loaded = Checkpoint::load(&path).unwrap();

        assert_eq!(loaded.state, state);
        assert_eq!(loaded.config.search_limit, 4);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.chk");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(Checkpoint::load(&path), Err(CheckpointError::Json(_))));
        assert!(matches!(
            Checkpoint::load(&dir.path().join("missing.chk")),
            Err(CheckpointError::Io(_))
        ));
    }
}
