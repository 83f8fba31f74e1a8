//! Basin classification of descent endpoints.
//!
//! After descending from the chosen saddle, the endpoint is compared with the
//! minimum the step started from. If the two are within the threshold the descent
//! fell back into the starting basin and the reverse-side descent is attempted.

use crate::config::DEFAULT_DISPLACEMENT_THRESHOLD;
use crate::geometry::Configuration;

/// Decides whether a descent endpoint is the starting minimum or a new state.
#[derive(Debug, Clone, Copy)]
pub struct MinimumClassifier {
    threshold: f64,
}

impl Default for MinimumClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLACEMENT_THRESHOLD)
    }
}

impl MinimumClassifier {
    /// Creates a classifier with the given squared-displacement threshold.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Returns `true` when `new_positions` lies in the basin of `reference`.
    ///
    /// Same basin iff the total squared displacement is not greater than the
    /// threshold.
    pub fn same_basin(&self, new_positions: &Configuration, reference: &Configuration) -> bool {
        new_positions.squared_displacement(reference) <= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn origin_pair() -> Configuration {
        Configuration::new(vec![Vector3::zeros(), Vector3::new(3.0, 0.0, 0.0)])
    }

    #[test]
    fn test_small_move_is_same_basin() {
        let classifier = MinimumClassifier::default();
        let mut moved = origin_pair();
        moved.positions[1].z = 0.3;
        assert!(classifier.same_basin(&moved, &origin_pair()));
    }

    #[test]
    fn test_exact_threshold_is_same_basin() {
        let classifier = MinimumClassifier::default();
        let mut moved = origin_pair();
        moved.positions[0].x = 0.5;
        moved.positions[1].y = 0.5;
        assert!(classifier.same_basin(&moved, &origin_pair()));
    }

    #[test]
    fn test_single_coordinate_beyond_threshold_is_new_basin() {
        let classifier = MinimumClassifier::default();
        let mut moved = origin_pair();
        moved.positions[0].y = 0.5_f64.sqrt() + 1e-6;
        assert!(!classifier.same_basin(&moved, &origin_pair()));
    }
}
