//! Harmonic transition-state rates and BKL event selection.
//!
//! # Rate Model
//!
//! For every candidate saddle `i` with a non-zero energy:
//!
//! ```text
//! k_i = (nu_min / nu_i / m) * exp(-(E_i - E_min) * beta)
//! ```
//!
//! where `nu_min` and `nu_i` are the vibrational prefactors (products of normal-mode
//! frequencies) of the current minimum and the saddle, `m` is the mass factor and
//! `beta = 1 / (k_B T)`. A saddle energy of exactly zero marks a "no data" entry;
//! it gets a zero rate and can never be selected.
//!
//! # Selection
//!
//! With `R = sum k_i` the residence time is drawn as `-ln(u1) / R` and the event as
//! the first index whose cumulative rate reaches `u2 * R`. A zero or non-finite `R`
//! is reported as [`RateError::NoViableTransition`] instead of corrupting the clock.

use crate::geometry::SearchResult;
use rand::Rng;
use thiserror::Error;

/// Errors raised by rate computation and selection.
#[derive(Error, Debug, PartialEq)]
pub enum RateError {
    /// No candidate carries a usable rate
    #[error("no viable transition among {candidates} candidates (rate sum {rate_sum})")]
    NoViableTransition {
        /// Number of candidates offered
        candidates: usize,
        /// Sum of their rates
        rate_sum: f64,
    },
}

/// Rates of the candidates of one step, in candidate order.
#[derive(Debug, Clone, PartialEq)]
pub struct RateVector {
    rates: Vec<f64>,
    valid: Vec<bool>,
}

impl RateVector {
    /// Builds a rate vector from raw rates, treating every entry as valid.
    pub fn from_rates(rates: Vec<f64>) -> Self {
        let valid = vec![true; rates.len()];
        Self { rates, valid }
    }

    /// Rate of every candidate (zero for sentinel entries).
    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    /// Returns `true` if candidate `index` takes part in the selection.
    pub fn is_valid(&self, index: usize) -> bool {
        self.valid.get(index).copied().unwrap_or(false)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Sum over valid entries.
    pub fn sum(&self) -> f64 {
        self.rates
            .iter()
            .zip(&self.valid)
            .filter(|(_, v)| **v)
            .map(|(r, _)| *r)
            .sum()
    }
}

/// Outcome of one BKL draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    /// Index of the chosen candidate
    pub index: usize,
    /// Residence time drawn for the current state
    pub time_increment: f64,
    /// Total rate out of the current state
    pub rate_sum: f64,
}

/// Converts saddles to hTST rates and performs the BKL selection.
#[derive(Debug, Clone, Copy)]
pub struct RateEngine {
    mass_factor: f64,
    beta: f64,
}

impl RateEngine {
    /// Creates an engine for the given mass factor and inverse temperature.
    pub fn new(mass_factor: f64, beta: f64) -> Self {
        Self { mass_factor, beta }
    }

    /// hTST rate of a single saddle out of the given minimum.
    pub fn rate(&self, saddle: &SearchResult, min_energy: f64, min_prefactor: f64) -> f64 {
        (min_prefactor / saddle.vibrational_prefactor / self.mass_factor)
            * (-(saddle.saddle_energy - min_energy) * self.beta).exp()
    }

    /// Computes the rate of every candidate, marking sentinel entries invalid.
    pub fn compute_rates<'a, I>(&self, candidates: I, min_energy: f64, min_prefactor: f64) -> RateVector
    where
        I: IntoIterator<Item = &'a SearchResult>,
    {
        let mut rates = Vec::new();
        let mut valid = Vec::new();
        for saddle in candidates {
            if saddle.is_sentinel() {
                rates.push(0.0);
                valid.push(false);
            } else {
                rates.push(self.rate(saddle, min_energy, min_prefactor));
                valid.push(true);
            }
        }
        RateVector { rates, valid }
    }

    /// Draws the residence time and the next event.
    ///
    /// The residence-time draw happens before the event draw, so a given random
    /// stream always produces the same pair.
    pub fn select<R: Rng + ?Sized>(&self, rates: &RateVector, rng: &mut R) -> Result<Selection, RateError> {
        let rate_sum = rates.sum();
        let last_valid = (0..rates.len()).rev().find(|&i| rates.is_valid(i));
        let last_valid = match last_valid {
            Some(i) if rate_sum.is_finite() && rate_sum > 0.0 => i,
            _ => {
                return Err(RateError::NoViableTransition {
                    candidates: rates.len(),
                    rate_sum,
                })
            }
        };

        // u1 in (0, 1] keeps the logarithm finite
        let u1 = 1.0 - rng.gen::<f64>();
        let time_increment = -u1.ln() / rate_sum;

        let target = rng.gen::<f64>() * rate_sum;
        let mut cumulative = 0.0;
        let mut index = last_valid;
        for (i, &rate) in rates.rates().iter().enumerate() {
            if !rates.is_valid(i) {
                continue;
            }
            cumulative += rate;
            if cumulative >= target {
                index = i;
                break;
            }
        }

        Ok(Selection {
            index,
            time_increment,
            rate_sum,
        })
    }

    /// Computes the rates of `candidates`, selects one and returns the chosen index
    /// with the advanced clock.
    pub fn compute_rates_and_select<'a, I, R>(
        &self,
        candidates: I,
        min_energy: f64,
        min_prefactor: f64,
        elapsed_time: f64,
        rng: &mut R,
    ) -> Result<(usize, f64), RateError>
    where
        I: IntoIterator<Item = &'a SearchResult>,
        R: Rng + ?Sized,
    {
        let rates = self.compute_rates(candidates, min_energy, min_prefactor);
        let selection = self.select(&rates, rng)?;
        Ok((selection.index, elapsed_time + selection.time_increment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Configuration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn saddle(energy: f64, prefactor: f64) -> SearchResult {
        SearchResult {
            saddle_energy: energy,
            vibrational_prefactor: prefactor,
            saddle_positions: Configuration::from_flat(&[0.0, 0.0, 0.0]),
        }
    }

    #[test]
    fn test_htst_rate() {
        let engine = RateEngine::new(2.0, 10.0);
        let rate = engine.rate(&saddle(-0.9, 4.0), -1.0, 16.0);
        let expected = (16.0 / 4.0 / 2.0) * (-0.1_f64 * 10.0).exp();
        assert!((rate - expected).abs() < 1e-12);
    }

    #[test]
    fn test_selection_matches_weights() {
        let engine = RateEngine::new(1.0, 1.0);
        let rates = RateVector::from_rates(vec![1.0, 3.0]);
        let mut rng = StdRng::seed_from_u64(42);

        let trials = 10_000;
        let mut hits = 0;
        for _ in 0..trials {
            if engine.select(&rates, &mut rng).unwrap().index == 1 {
                hits += 1;
            }
        }
        let fraction = hits as f64 / trials as f64;
        assert!((fraction - 0.75).abs() < 0.02, "fraction {}", fraction);
    }

    #[test]
    fn test_mean_residence_time() {
        let engine = RateEngine::new(1.0, 1.0);
        let rates = RateVector::from_rates(vec![0.5, 1.5]);
        let mut rng = StdRng::seed_from_u64(7);

        let trials = 20_000;
        let total: f64 = (0..trials)
            .map(|_| engine.select(&rates, &mut rng).unwrap().time_increment)
            .sum();
        let mean = total / trials as f64;
        assert!((mean - 0.5).abs() < 0.02, "mean {}", mean);
    }

    #[test]
    fn test_sentinel_is_excluded() {
        let engine = RateEngine::new(1.0, 1.0);
        let candidates = vec![saddle(0.0, 1.0e-9), saddle(-0.5, 1.0), saddle(0.0, 5.0)];
        let rates = engine.compute_rates(&candidates, -1.0, 1.0);

        assert_eq!(rates.rates()[0], 0.0);
        assert!(!rates.is_valid(0));
        assert!(!rates.is_valid(2));
        assert!((rates.sum() - (-0.5_f64).exp()).abs() < 1e-12);

        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1000 {
            assert_eq!(engine.select(&rates, &mut rng).unwrap().index, 1);
        }
    }

    #[test]
    fn test_all_sentinels_is_an_error() {
        let engine = RateEngine::new(1.0, 1.0);
        let candidates = vec![saddle(0.0, 1.0), saddle(0.0, 2.0)];
        let rates = engine.compute_rates(&candidates, -1.0, 1.0);
        let mut rng = StdRng::seed_from_u64(1);

        let err = engine.select(&rates, &mut rng).unwrap_err();
        assert_eq!(
            err,
            RateError::NoViableTransition {
                candidates: 2,
                rate_sum: 0.0
            }
        );
    }

    #[test]
    fn test_empty_and_underflowing_rates_are_errors() {
        let engine = RateEngine::new(1.0, 1.0e6);
        let mut rng = StdRng::seed_from_u64(1);

        let empty = engine.compute_rates(Vec::<&SearchResult>::new(), 0.0, 1.0);
        assert!(engine.select(&empty, &mut rng).is_err());

        // exp(-1e6) underflows to zero
        let candidates = vec![saddle(1.0, 1.0)];
        let rates = engine.compute_rates(&candidates, 0.0, 1.0);
        assert!(engine.select(&rates, &mut rng).is_err());
    }

    #[test]
    fn test_compute_rates_and_select_advances_clock() {
        let engine = RateEngine::new(1.0, 1.0);
        let candidates = vec![saddle(-0.5, 1.0)];
        let mut rng = StdRng::seed_from_u64(11);

        let (index, elapsed) = engine
            .compute_rates_and_select(&candidates, -1.0, 1.0, 10.0, &mut rng)
            .unwrap();
        assert_eq!(index, 0);
        assert!(elapsed >= 10.0);
    }
}
