//! Runtime parameters for KMC runs.
//!
//! This module defines the configuration structures consumed by the step
//! controllers:
//!
//! - [`KmcConfig`]: search, rate and descent parameters shared by both controllers
//! - [`ClusterConfig`]: worker count, polling and deadline for the cluster controller
//! - [`OverlapPolicy`]: what a configuration-overlap fault during a search reset does
//!
//! All structures implement `Default` with production values and can be filled
//! from INI files through
//! [`SettingsManager`](crate::settings::SettingsManager).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Inner iteration budget of one saddle-search attempt.
pub const DEFAULT_SEARCH_ITERATIONS: usize = 500;
/// Iteration budget of one minimization.
pub const DEFAULT_MINIMIZE_ITERATIONS: usize = 1000;
/// Squared-displacement threshold for saddle uniqueness and basin classification.
pub const DEFAULT_DISPLACEMENT_THRESHOLD: f64 = 0.5;

/// Handling of a configuration-overlap fault reported by a search reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OverlapPolicy {
    /// Log a warning and drop the current attempt; the step continues
    #[default]
    SkipAttempt,
    /// Stop the step and report the fault at the step boundary
    AbortStep,
}

impl std::str::FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" | "skip_attempt" | "skipattempt" => Ok(OverlapPolicy::SkipAttempt),
            "abort" | "abort_step" | "abortstep" => Ok(OverlapPolicy::AbortStep),
            other => Err(format!("Unknown overlap policy: {}", other)),
        }
    }
}

/// Parameters of the transition search, rate and descent pipeline.
///
/// # Examples
///
/// ```
/// use okmc::config::KmcConfig;
///
/// let mut config = KmcConfig::default();
/// config.temperature = 0.05;
/// assert!((config.beta() - 20.0).abs() < 1e-12);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KmcConfig {
    /// Number of unique saddles to collect per step
    pub search_limit: usize,
    /// Maximum number of search attempts per step
    pub max_search_attempts: usize,
    /// Iteration budget of one search attempt
    pub search_iterations: usize,
    /// Iteration budget of one minimization
    pub minimize_iterations: usize,
    /// Saddles closer than this total squared displacement are duplicates
    pub uniqueness_threshold: f64,
    /// Minima within this total squared displacement are the same basin
    pub basin_threshold: f64,
    /// Maximum magnitude of the random offset applied to each coordinate
    pub max_perturbation: f64,
    /// Temperature in simulation energy units (k_B T)
    pub temperature: f64,
    /// Divisor applied to every hTST prefactor ratio
    pub mass_factor: f64,
    /// Handling of configuration-overlap faults
    pub overlap_policy: OverlapPolicy,
    /// Seed of the random stream; `None` seeds from entropy
    pub seed: Option<u64>,
    /// Checkpoint file written after every committed step.
    ///
    /// A relative path is resolved against `work_dir` in cluster runs and against
    /// the process working directory by [`KmcController`](crate::controller::KmcController),
    /// whose store need not be a directory.
    pub checkpoint_file: Option<String>,
    /// Prefix prepended to step output names
    pub run_prefix: String,
}

impl Default for KmcConfig {
    fn default() -> Self {
        Self {
            search_limit: 10,
            max_search_attempts: 50,
            search_iterations: DEFAULT_SEARCH_ITERATIONS,
            minimize_iterations: DEFAULT_MINIMIZE_ITERATIONS,
            uniqueness_threshold: DEFAULT_DISPLACEMENT_THRESHOLD,
            basin_threshold: DEFAULT_DISPLACEMENT_THRESHOLD,
            max_perturbation: 0.1,
            temperature: 1.0,
            mass_factor: 1.0,
            overlap_policy: OverlapPolicy::default(),
            seed: None,
            checkpoint_file: None,
            run_prefix: String::new(),
        }
    }
}

impl KmcConfig {
    /// Inverse temperature `1 / (k_B T)`.
    pub fn beta(&self) -> f64 {
        1.0 / self.temperature
    }

    /// Checks that all parameters are usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.search_limit == 0 {
            return Err("search_limit must be at least 1".to_string());
        }
        if self.max_search_attempts == 0 {
            return Err("max_search_attempts must be at least 1".to_string());
        }
        if self.search_iterations == 0 || self.minimize_iterations == 0 {
            return Err("iteration budgets must be at least 1".to_string());
        }
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(format!(
                "temperature must be positive, got {}",
                self.temperature
            ));
        }
        if !(self.mass_factor.is_finite() && self.mass_factor > 0.0) {
            return Err(format!(
                "mass_factor must be positive, got {}",
                self.mass_factor
            ));
        }
        if self.uniqueness_threshold < 0.0 || self.basin_threshold < 0.0 {
            return Err("displacement thresholds must not be negative".to_string());
        }
        if self.max_perturbation < 0.0 {
            return Err("max_perturbation must not be negative".to_string());
        }
        Ok(())
    }
}

/// Parameters of the filesystem worker protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Number of worker processes (ids `0..workers`)
    pub workers: usize,
    /// Directory shared with the workers
    pub work_dir: String,
    /// Seconds between two polls of the completion flags
    pub poll_interval_secs: f64,
    /// Seconds to wait for all workers before giving up; zero waits forever
    pub worker_deadline_secs: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            work_dir: ".".to_string(),
            poll_interval_secs: 20.0,
            worker_deadline_secs: 86_400.0,
        }
    }
}

impl ClusterConfig {
    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs.max(0.0))
    }

    /// Worker deadline, or `None` when waiting is unbounded.
    pub fn worker_deadline(&self) -> Option<Duration> {
        if self.worker_deadline_secs > 0.0 {
            Some(Duration::from_secs_f64(self.worker_deadline_secs))
        } else {
            None
        }
    }

    /// Checks that all parameters are usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be at least 1".to_string());
        }
        if !(self.poll_interval_secs.is_finite() && self.poll_interval_secs >= 0.0) {
            return Err(format!(
                "poll_interval_secs must be a non-negative number, got {}",
                self.poll_interval_secs
            ));
        }
        if !self.worker_deadline_secs.is_finite() {
            return Err("worker_deadline_secs must be finite".to_string());
        }
        Ok(())
    }
}
