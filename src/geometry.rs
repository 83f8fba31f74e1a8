//! Core configuration and stationary-point data structures.
//!
//! This module provides the value types shared by every part of the KMC engine:
//!
//! - [`Configuration`]: ordered positions of the mobile particles
//! - [`SearchResult`]: a converged saddle point with its energy and vibrational prefactor
//! - [`MinimumResult`]: the endpoint of a descent from a saddle point
//!
//! Positions are plain Cartesian 3-vectors in simulation length units. Energies
//! are in simulation energy units; nothing here performs unit conversion.

use nalgebra::Vector3;
use rand::Rng;
use rand_distr::StandardNormal;

/// Scale applied to each standard-normal draw before clamping a perturbation.
const PERTURBATION_SCALE: f64 = 0.1;

/// Ordered set of mobile-particle positions.
///
/// The order of `positions` is significant: particle `i` of one configuration is
/// compared with particle `i` of another when computing displacements, so all
/// configurations of one run must list the mobile particles in the same order.
///
/// # Examples
///
/// ```
/// use nalgebra::Vector3;
/// use okmc::geometry::Configuration;
///
/// let a = Configuration::new(vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0)]);
/// let b = Configuration::new(vec![Vector3::new(0.5, 0.0, 0.0), Vector3::new(1.0, 0.5, 0.0)]);
///
/// assert_eq!(a.num_atoms(), 2);
/// assert!((a.squared_displacement(&b) - 0.5).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    /// Positions of the mobile particles
    pub positions: Vec<Vector3<f64>>,
}

impl Configuration {
    /// Create a configuration from a list of positions.
    pub fn new(positions: Vec<Vector3<f64>>) -> Self {
        Self { positions }
    }

    /// Create a configuration from flattened coordinates `[x1, y1, z1, x2, ...]`.
    ///
    /// # Panics
    ///
    /// Panics if `coords.len()` is not a multiple of three.
    pub fn from_flat(coords: &[f64]) -> Self {
        assert_eq!(coords.len() % 3, 0);
        let positions = coords
            .chunks_exact(3)
            .map(|c| Vector3::new(c[0], c[1], c[2]))
            .collect();
        Self { positions }
    }

    /// Number of mobile particles.
    pub fn num_atoms(&self) -> usize {
        self.positions.len()
    }

    /// Get the Cartesian coordinates of a specific particle.
    pub fn get_atom_coords(&self, atom_idx: usize) -> [f64; 3] {
        let p = &self.positions[atom_idx];
        [p.x, p.y, p.z]
    }

    /// Returns `true` when both configurations hold the same number of particles.
    pub fn same_particles(&self, other: &Configuration) -> bool {
        self.positions.len() == other.positions.len()
    }

    /// Total squared displacement between two configurations.
    ///
    /// Sums `|r_i - r'_i|^2` over all mobile particles. Configurations with a
    /// different number of particles are infinitely far apart.
    pub fn squared_displacement(&self, other: &Configuration) -> f64 {
        if !self.same_particles(other) {
            return f64::INFINITY;
        }
        self.positions
            .iter()
            .zip(other.positions.iter())
            .map(|(a, b)| (a - b).norm_squared())
            .sum()
    }

    /// Per-axis mean squared displacement relative to `reference`.
    ///
    /// Component `k` of the result is `mean_i (r_ik - r'_ik)^2`. Returns the zero
    /// vector for an empty configuration.
    pub fn mean_squared_displacement(&self, reference: &Configuration) -> Vector3<f64> {
        let n = self.positions.len().min(reference.positions.len());
        if n == 0 {
            return Vector3::zeros();
        }
        let sum = self
            .positions
            .iter()
            .zip(reference.positions.iter())
            .fold(Vector3::zeros(), |acc: Vector3<f64>, (a, b)| {
                let d = a - b;
                acc + d.component_mul(&d)
            });
        sum / n as f64
    }

    /// Return a randomly displaced copy of this configuration.
    ///
    /// Every coordinate receives an independent standard-normal offset scaled by
    /// 0.1 and clamped to `[-max_displacement, max_displacement]`.
    pub fn perturbed<R: Rng + ?Sized>(&self, rng: &mut R, max_displacement: f64) -> Self {
        let positions = self
            .positions
            .iter()
            .map(|p| {
                let mut offset = Vector3::zeros();
                for k in 0..3 {
                    let draw: f64 = rng.sample(StandardNormal);
                    offset[k] =
                        (draw * PERTURBATION_SCALE).clamp(-max_displacement, max_displacement);
                }
                p + offset
            })
            .collect();
        Self { positions }
    }
}

/// A converged saddle point found by one search attempt.
///
/// A `saddle_energy` of exactly zero is the "no data" sentinel used by workers
/// that report an empty result; such entries never receive a rate.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Potential energy at the saddle point
    pub saddle_energy: f64,
    /// Product of the normal-mode frequencies at the saddle point
    pub vibrational_prefactor: f64,
    /// Particle positions at the saddle point
    pub saddle_positions: Configuration,
}

impl SearchResult {
    /// Returns `true` when this result carries the zero-energy "no data" sentinel.
    pub fn is_sentinel(&self) -> bool {
        self.saddle_energy == 0.0
    }

    /// Validates that the result can be turned into a rate.
    ///
    /// Sentinel entries are valid (they are filtered later); non-finite energies
    /// and non-positive prefactors are not.
    pub fn validate(&self) -> Result<(), String> {
        if !self.saddle_energy.is_finite() {
            return Err(format!(
                "Saddle energy is not finite: {}",
                self.saddle_energy
            ));
        }
        if self.is_sentinel() {
            return Ok(());
        }
        if !(self.vibrational_prefactor.is_finite() && self.vibrational_prefactor > 0.0) {
            return Err(format!(
                "Vibrational prefactor must be positive and finite, got {}",
                self.vibrational_prefactor
            ));
        }
        if self.saddle_positions.num_atoms() == 0 {
            return Err("Saddle configuration contains no particles".to_string());
        }
        Ok(())
    }
}

/// Endpoint of a minimization started from a saddle point.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimumResult {
    /// Potential energy at the endpoint
    pub energy: f64,
    /// Product of the normal-mode frequencies at the endpoint
    pub vibrational_prefactor: f64,
    /// Particle positions at the endpoint
    pub positions: Configuration,
}
