//! Interfaces of the saddle-search and minimization collaborators.
//!
//! The saddle-search algorithm (for example the dimer method) and the energy
//! minimizer are not part of this crate. Controllers and workers drive them through
//! the [`SaddleSearcher`] and [`Minimizer`] traits, one iteration at a time, so the
//! iteration budgets stay under the caller's control.
//!
//! # Usage Pattern
//!
//! ```ignore
//! searcher.reset(&perturbed)?;
//! let found = drive_search(&mut searcher, 500)?;
//!
//! minimizer.reset(&saddle, DescentSide::Forward)?;
//! let (minimum, converged) = drive_minimizer(&mut minimizer, 1000)?;
//! ```

use crate::geometry::{Configuration, MinimumResult, SearchResult};
use thiserror::Error;

/// Errors reported by search and minimization collaborators.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The start configuration contains unphysical particle overlaps
    #[error("configuration overlap: {0}")]
    Overlap(String),
    /// The collaborator failed for another reason
    #[error("collaborator failure: {0}")]
    Failed(String),
}

/// Result type for collaborator operations
pub type Result<T> = std::result::Result<T, SearchError>;

/// Side of the saddle a descent starts on.
///
/// The forward side is the one the saddle search approached from; the reverse side
/// is the opposite end of the unstable mode, used when the forward descent falls
/// back into the starting basin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescentSide {
    /// Descend along the search direction
    Forward,
    /// Descend against the search direction
    Reverse,
}

/// A saddle-point search driven one iteration at a time.
pub trait SaddleSearcher {
    /// Starts a new search from `start`.
    ///
    /// Returns [`SearchError::Overlap`] when `start` is unphysical.
    fn reset(&mut self, start: &Configuration) -> Result<()>;

    /// Performs one iteration.
    ///
    /// Returns `Ok(Some(result))` once the search has converged on a saddle point and
    /// `Ok(None)` while it is still running.
    fn step(&mut self) -> Result<Option<SearchResult>>;
}

/// An energy minimization driven one iteration at a time.
pub trait Minimizer {
    /// Starts a descent from `saddle` on the given side.
    fn reset(&mut self, saddle: &Configuration, side: DescentSide) -> Result<()>;

    /// Performs one iteration and returns `true` once converged.
    fn step(&mut self) -> Result<bool>;

    /// Current endpoint of the descent, converged or not.
    fn current(&self) -> MinimumResult;
}

/// Drives `searcher` for at most `max_iterations` iterations.
///
/// Returns `Ok(None)` when the budget runs out without convergence, which is not an
/// error.
pub fn drive_search<S: SaddleSearcher + ?Sized>(
    searcher: &mut S,
    max_iterations: usize,
) -> Result<Option<SearchResult>> {
    for _ in 0..max_iterations {
        if let Some(result) = searcher.step()? {
            return Ok(Some(result));
        }
    }
    Ok(None)
}

/// Drives `minimizer` for at most `max_iterations` iterations.
///
/// Returns the endpoint reached and whether it converged.
pub fn drive_minimizer<M: Minimizer + ?Sized>(
    minimizer: &mut M,
    max_iterations: usize,
) -> Result<(MinimumResult, bool)> {
    let mut converged = false;
    for _ in 0..max_iterations {
        if minimizer.step()? {
            converged = true;
            break;
        }
    }
    Ok((minimizer.current(), converged))
}
