//! The persisted KMC state.
//!
//! [`KmcState`] is the only aggregate the engine mutates in place. Controllers
//! change it exclusively through [`KmcState::commit`] once a step has completed, so
//! a step that fails half-way leaves it untouched.

use crate::geometry::{Configuration, MinimumResult};

/// Current minimum, KMC clock and step counter of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct KmcState {
    /// Positions of the mobile particles at the current minimum
    pub positions: Configuration,
    /// Potential energy of the current minimum
    pub minimum_energy: f64,
    /// Product of the normal-mode frequencies of the current minimum
    pub minimum_vibrational_prefactor: f64,
    /// Simulated physical time
    pub elapsed_time: f64,
    /// Number of committed steps
    pub step_counter: usize,
}

impl KmcState {
    /// Creates the state of a fresh run at time zero.
    pub fn new(positions: Configuration, minimum_energy: f64, minimum_vibrational_prefactor: f64) -> Self {
        Self {
            positions,
            minimum_energy,
            minimum_vibrational_prefactor,
            elapsed_time: 0.0,
            step_counter: 0,
        }
    }

    /// Creates the state from the endpoint of an initial minimization.
    pub fn from_minimum(minimum: MinimumResult) -> Self {
        Self::new(minimum.positions, minimum.energy, minimum.vibrational_prefactor)
    }

    /// Replaces the current minimum, advances the clock and the step counter.
    ///
    /// Negative or non-finite increments leave the clock where it is, so it never
    /// runs backwards.
    pub fn commit(&mut self, minimum: MinimumResult, time_increment: f64) {
        self.positions = minimum.positions;
        self.minimum_energy = minimum.energy;
        self.minimum_vibrational_prefactor = minimum.vibrational_prefactor;
        if time_increment.is_finite() && time_increment > 0.0 {
            self.elapsed_time += time_increment;
        }
        self.step_counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_advances_counter_once() {
        let start = Configuration::from_flat(&[0.0, 0.0, 0.0]);
        let mut state = KmcState::new(start, -1.0, 2.0);

        let next = MinimumResult {
            energy: -1.2,
            vibrational_prefactor: 3.0,
            positions: Configuration::from_flat(&[1.0, 0.0, 0.0]),
        };
        state.commit(next.clone(), 0.25);

        assert_eq!(state.step_counter, 1);
        assert_eq!(state.elapsed_time, 0.25);
        assert_eq!(state.minimum_energy, -1.2);
        assert_eq!(state.positions, next.positions);
    }

    #[test]
    fn test_commit_never_rewinds_clock() {
        let mut state = KmcState::new(Configuration::from_flat(&[0.0, 0.0, 0.0]), -1.0, 1.0);
        state.elapsed_time = 4.0;
        let same = MinimumResult {
            energy: -1.0,
            vibrational_prefactor: 1.0,
            positions: state.positions.clone(),
        };
        state.commit(same.clone(), f64::NAN);
        state.commit(same, -1.0);
        assert_eq!(state.elapsed_time, 4.0);
        assert_eq!(state.step_counter, 2);
    }
}
