//! Candidate bookkeeping and saddle deduplication for one KMC step.
//!
//! Every step rebuilds a [`CandidateSet`] from scratch. A newly converged saddle is
//! only accepted if [`UniquenessFilter::is_unique`] finds no accepted saddle within
//! the squared-displacement threshold. Accepted saddles are compared through their
//! persisted configurations, reloaded from the store on every check.

use crate::config::DEFAULT_DISPLACEMENT_THRESHOLD;
use crate::geometry::{Configuration, SearchResult};
use crate::store::{ConfigurationStore, Result};
use log::debug;

/// An accepted saddle together with the store key of its configuration.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The converged search result
    pub result: SearchResult,
    /// Store key under which the saddle configuration was saved
    pub config_name: String,
}

/// Ordered, capped set of unique saddles collected during one step.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    entries: Vec<Candidate>,
    limit: usize,
}

impl CandidateSet {
    /// Creates an empty set that holds at most `limit` entries.
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::with_capacity(limit),
            limit,
        }
    }

    /// Maximum number of entries.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of accepted entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been accepted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` once `limit` entries have been accepted.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.limit
    }

    /// Appends a candidate. Returns `false` (and drops it) when the set is full.
    pub fn push(&mut self, candidate: Candidate) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries.push(candidate);
        true
    }

    /// Accepted entries in acceptance order.
    pub fn entries(&self) -> &[Candidate] {
        &self.entries
    }

    /// Entry at `index`.
    pub fn get(&self, index: usize) -> Option<&Candidate> {
        self.entries.get(index)
    }

    /// Iterates over the search results in acceptance order.
    pub fn results(&self) -> impl Iterator<Item = &SearchResult> {
        self.entries.iter().map(|c| &c.result)
    }
}

/// Deduplicates saddle configurations by total squared displacement.
#[derive(Debug, Clone, Copy)]
pub struct UniquenessFilter {
    threshold: f64,
}

impl Default for UniquenessFilter {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLACEMENT_THRESHOLD)
    }
}

impl UniquenessFilter {
    /// Creates a filter with the given squared-displacement threshold.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Squared-displacement threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Returns `true` if `a` and `b` are the same saddle.
    ///
    /// Duplicate iff the total squared displacement is strictly below the threshold.
    pub fn is_duplicate(&self, a: &Configuration, b: &Configuration) -> bool {
        a.squared_displacement(b) < self.threshold
    }

    /// Checks `candidate` against every accepted entry of `accepted`.
    ///
    /// Each accepted saddle is reloaded from `store` under its recorded name.
    /// Stops at the first duplicate.
    pub fn is_unique<C: ConfigurationStore + ?Sized>(
        &self,
        candidate: &Configuration,
        accepted: &CandidateSet,
        store: &C,
    ) -> Result<bool> {
        for entry in accepted.entries() {
            let saved = store.load(&entry.config_name)?;
            if self.is_duplicate(candidate, &saved) {
                debug!("Saddle duplicates accepted candidate '{}'", entry.config_name);
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use nalgebra::Vector3;

    fn config_at(x: f64) -> Configuration {
        Configuration::new(vec![Vector3::new(x, 0.0, 0.0), Vector3::new(5.0, 0.0, 0.0)])
    }

    fn candidate(name: &str, x: f64) -> Candidate {
        Candidate {
            result: SearchResult {
                saddle_energy: -1.0,
                vibrational_prefactor: 1.0,
                saddle_positions: config_at(x),
            },
            config_name: name.to_string(),
        }
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let filter = UniquenessFilter::default();
        let a = config_at(0.0);

        // displacement exactly 0.5 is not a duplicate
        let exact = Configuration::new(vec![Vector3::new(0.5, 0.0, 0.0), Vector3::new(5.0, 0.5, 0.0)]);
        assert_eq!(a.squared_displacement(&exact), 0.5);
        assert!(!filter.is_duplicate(&a, &exact));
        assert!(!filter.is_duplicate(&exact, &a));

        let close = config_at(0.7);
        assert!(filter.is_duplicate(&a, &close));
        assert!(filter.is_duplicate(&close, &a));
    }

    #[test]
    fn test_is_unique_reloads_from_store() {
        let store = MemoryStore::new();
        let mut accepted = CandidateSet::new(4);

        let first = candidate("s_0_saddle", 0.0);
        store.save(&first.config_name, &first.result.saddle_positions).unwrap();
        accepted.push(first);

        let filter = UniquenessFilter::default();
        assert!(!filter.is_unique(&config_at(0.1), &accepted, &store).unwrap());
        assert!(filter.is_unique(&config_at(2.0), &accepted, &store).unwrap());

        // The stored copy is authoritative, not the in-memory result
        store.save("s_0_saddle", &config_at(2.0)).unwrap();
        assert!(!filter.is_unique(&config_at(2.0), &accepted, &store).unwrap());
    }

    #[test]
    fn test_is_unique_propagates_missing_configuration() {
        let store = MemoryStore::new();
        let mut accepted = CandidateSet::new(2);
        accepted.push(candidate("never_saved", 0.0));

        let filter = UniquenessFilter::default();
        assert!(filter.is_unique(&config_at(3.0), &accepted, &store).is_err());
    }

    #[test]
    fn test_candidate_set_is_capped() {
        let mut set = CandidateSet::new(2);
        assert!(set.push(candidate("a", 0.0)));
        assert!(set.push(candidate("b", 1.0)));
        assert!(set.is_full());
        assert!(!set.push(candidate("c", 2.0)));
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(1).unwrap().config_name, "b");
    }
}
