//! Single-process KMC step controller.
//!
//! One call to [`KmcController::step`] performs one KMC event:
//!
//! 1. **Searching**: perturb the current minimum and run saddle searches until
//!    `search_limit` unique saddles are collected or `max_search_attempts` runs out
//! 2. **RateSelection**: convert the saddles to hTST rates and draw the event and
//!    the residence time
//! 3. **Descending**: minimize from the chosen saddle on the forward side
//! 4. **DescendingRetry**: if the forward descent fell back into the starting
//!    basin, minimize once more on the reverse side and accept that endpoint
//! 5. **Committed**: persist the new minimum and advance the clock and step counter
//!
//! The rate selection, descent and commit phases are shared with the cluster
//! controller through [`StepPipeline`]. The [`KmcState`] is replaced only after
//! every write of the commit phase succeeded, so a failed step can be retried.

use crate::checkpoint::{Checkpoint, CheckpointError};
use crate::classifier::MinimumClassifier;
use crate::cleanup::CleanupError;
use crate::cluster::ClusterError;
use crate::config::{KmcConfig, OverlapPolicy};
use crate::geometry::{Configuration, MinimumResult, SearchResult};
use crate::io::EnergyRecord;
use crate::naming::FileNaming;
use crate::rates::{RateEngine, RateError, Selection};
use crate::search::{drive_minimizer, drive_search, DescentSide, Minimizer, SaddleSearcher, SearchError};
use crate::state::KmcState;
use crate::store::{ConfigurationStore, StoreError};
use crate::uniqueness::{Candidate, CandidateSet, UniquenessFilter};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported at the boundary of a KMC step.
#[derive(Error, Debug)]
pub enum StepError {
    /// Configuration store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Search or minimization collaborator failure
    #[error("search error: {0}")]
    Search(#[from] SearchError),
    /// Rate selection failure
    #[error("rate error: {0}")]
    Rate(#[from] RateError),
    /// Worker protocol failure
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),
    /// Protocol file removal failure
    #[error("cleanup error: {0}")]
    Cleanup(#[from] CleanupError),
    /// Checkpoint could not be written or read
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    /// Run log could not be written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A search start configuration overlapped and the policy aborts the step
    #[error("configuration overlap aborted the step: {0}")]
    Overlap(String),
    /// Run parameters are unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Phase a step controller is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    /// No step has run yet
    Idle,
    /// Collecting unique saddles
    Searching,
    /// Computing rates and drawing the event
    RateSelection,
    /// Forward-side descent from the chosen saddle
    Descending,
    /// Reverse-side descent after a return to the starting basin
    DescendingRetry,
    /// The last step was committed
    Committed,
}

/// Summary of one committed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// Step counter after the commit
    pub step: usize,
    /// Number of search attempts made (dispatched workers in cluster runs)
    pub attempts: usize,
    /// Number of unique saddles offered to the rate selection
    pub candidates: usize,
    /// Index of the chosen saddle within the candidate set
    pub selected: usize,
    /// Total rate out of the previous state
    pub rate_sum: f64,
    /// Residence time added to the clock
    pub time_increment: f64,
    /// Clock after the commit
    pub elapsed_time: f64,
    /// Whether the reverse-side descent was needed
    pub retried: bool,
}

/// Endpoint of the descent phase.
#[derive(Debug, Clone)]
pub(crate) struct Descent {
    pub(crate) minimum: MinimumResult,
    pub(crate) retried: bool,
}

/// Random stream for a run: seeded when a seed is configured, from entropy otherwise.
pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Rejects a descent endpoint that does not describe the saddle's particles.
fn check_endpoint(
    endpoint: &MinimumResult,
    saddle: &Configuration,
    side: DescentSide,
) -> Result<(), SearchError> {
    if endpoint.positions.same_particles(saddle) {
        return Ok(());
    }
    Err(SearchError::Failed(format!(
        "{:?} descent ended with {} particles, saddle has {}",
        side,
        endpoint.positions.num_atoms(),
        saddle.num_atoms()
    )))
}

/// Phases shared by the single-process and cluster controllers.
#[derive(Debug, Clone)]
pub(crate) struct StepPipeline {
    pub(crate) config: KmcConfig,
    pub(crate) naming: FileNaming,
    pub(crate) filter: UniquenessFilter,
    classifier: MinimumClassifier,
    engine: RateEngine,
}

impl StepPipeline {
    pub(crate) fn new(config: KmcConfig) -> Result<Self, StepError> {
        config.validate().map_err(StepError::InvalidConfig)?;
        Ok(Self {
            naming: FileNaming::with_prefix(&config.run_prefix),
            filter: UniquenessFilter::new(config.uniqueness_threshold),
            classifier: MinimumClassifier::new(config.basin_threshold),
            engine: RateEngine::new(config.mass_factor, config.beta()),
            config,
        })
    }

    /// Persists the current minimum under the current step index.
    pub(crate) fn store_current<C: ConfigurationStore + ?Sized>(
        &self,
        store: &C,
        state: &KmcState,
    ) -> Result<(), StepError> {
        let step = state.step_counter;
        store.save(&self.naming.minimum(step), &state.positions)?;
        store.save_record(
            &self.naming.energy_record(step),
            &EnergyRecord {
                energy: state.minimum_energy,
                vibrational_prefactor: state.minimum_vibrational_prefactor,
            },
        )?;
        Ok(())
    }

    /// Applies the overlap policy to a collaborator error.
    ///
    /// Returns `Ok(())` when the attempt should be dropped and the step continue.
    pub(crate) fn absorb_search_error(&self, err: SearchError) -> Result<(), StepError> {
        match err {
            SearchError::Overlap(reason) => match self.config.overlap_policy {
                OverlapPolicy::SkipAttempt => {
                    warn!("Configuration overlap, skipping attempt: {}", reason);
                    Ok(())
                }
                OverlapPolicy::AbortStep => Err(StepError::Overlap(reason)),
            },
            other => Err(other.into()),
        }
    }

    /// Screens a converged saddle and appends it to `candidates` if it is new.
    ///
    /// `config_name` is where the saddle configuration is (or will be) stored;
    /// when `persist` is set the configuration is saved there first.
    pub(crate) fn offer_candidate<C: ConfigurationStore + ?Sized>(
        &self,
        store: &C,
        candidates: &mut CandidateSet,
        result: SearchResult,
        config_name: String,
        particles: usize,
        persist: bool,
    ) -> Result<bool, StepError> {
        if let Err(reason) = result.validate() {
            warn!("Discarding saddle '{}': {}", config_name, reason);
            return Ok(false);
        }
        if result.saddle_positions.num_atoms() != particles {
            warn!(
                "Discarding saddle '{}': {} particles, expected {}",
                config_name,
                result.saddle_positions.num_atoms(),
                particles
            );
            return Ok(false);
        }
        if !self
            .filter
            .is_unique(&result.saddle_positions, candidates, store)?
        {
            debug!("Saddle '{}' is a duplicate", config_name);
            return Ok(false);
        }
        if persist {
            store.save(&config_name, &result.saddle_positions)?;
        }
        debug!(
            "Accepted saddle '{}' with energy {:.6}",
            config_name, result.saddle_energy
        );
        Ok(candidates.push(Candidate {
            result,
            config_name,
        }))
    }

    /// Computes the rates of `candidates` and draws the next event.
    pub(crate) fn select<R: Rng + ?Sized>(
        &self,
        candidates: &CandidateSet,
        state: &KmcState,
        rng: &mut R,
    ) -> Result<Selection, RateError> {
        let rates = self.engine.compute_rates(
            candidates.results(),
            state.minimum_energy,
            state.minimum_vibrational_prefactor,
        );
        debug!("Rates: {:?}", rates.rates());
        self.engine.select(&rates, rng)
    }

    /// Saves the chosen saddle and minimizes from it, retrying on the reverse side
    /// when the forward endpoint lies in the starting basin.
    ///
    /// `on_retry` is called before the reverse-side descent starts.
    pub(crate) fn descend<M, C>(
        &self,
        minimizer: &mut M,
        store: &C,
        step: usize,
        chosen: &Candidate,
        mut on_retry: impl FnMut(),
    ) -> Result<Descent, StepError>
    where
        M: Minimizer + ?Sized,
        C: ConfigurationStore + ?Sized,
    {
        let saddle = store.load(&chosen.config_name)?;
        store.save(&self.naming.step_saddle(step), &saddle)?;

        let iterations = self.config.minimize_iterations;
        minimizer.reset(&saddle, DescentSide::Forward)?;
        let (forward, converged) = drive_minimizer(minimizer, iterations)?;
        check_endpoint(&forward, &saddle, DescentSide::Forward)?;
        if !converged {
            warn!(
                "Forward descent of step {} did not converge in {} iterations",
                step, iterations
            );
        }
        store.save(&self.naming.forward_minimum(step), &forward.positions)?;

        let start = store.load(&self.naming.minimum(step))?;
        if !self.classifier.same_basin(&forward.positions, &start) {
            return Ok(Descent {
                minimum: forward,
                retried: false,
            });
        }

        info!("Step {}: forward descent returned to the starting basin, descending the reverse side", step);
        on_retry();
        minimizer.reset(&saddle, DescentSide::Reverse)?;
        let (reverse, converged) = drive_minimizer(minimizer, iterations)?;
        check_endpoint(&reverse, &saddle, DescentSide::Reverse)?;
        if !converged {
            warn!(
                "Reverse descent of step {} did not converge in {} iterations",
                step, iterations
            );
        }
        store.save(&self.naming.reverse_minimum(step), &reverse.positions)?;
        Ok(Descent {
            minimum: reverse,
            retried: true,
        })
    }

    /// Persists the new minimum and returns the committed state.
    ///
    /// `state` itself is not modified.
    pub(crate) fn commit<C: ConfigurationStore + ?Sized>(
        &self,
        store: &C,
        state: &KmcState,
        minimum: MinimumResult,
        time_increment: f64,
        checkpoint: Option<&Path>,
    ) -> Result<KmcState, StepError> {
        let next = state.step_counter + 1;
        store.save(&self.naming.minimum(next), &minimum.positions)?;
        store.save_record(
            &self.naming.energy_record(next),
            &EnergyRecord {
                energy: minimum.energy,
                vibrational_prefactor: minimum.vibrational_prefactor,
            },
        )?;

        let mut committed = state.clone();
        committed.commit(minimum, time_increment);
        if let Some(path) = checkpoint {
            Checkpoint::new(&committed, &self.config).save(path)?;
            debug!("Checkpoint written to {}", path.display());
        }
        Ok(committed)
    }
}

/// Runs KMC steps in the current process.
///
/// The searcher and minimizer are driven directly; every intermediate
/// configuration goes through the store `C`.
pub struct KmcController<S, M, C, R = StdRng> {
    pipeline: StepPipeline,
    searcher: S,
    minimizer: M,
    store: C,
    rng: R,
    state: KmcState,
    phase: StepPhase,
    checkpoint_path: Option<PathBuf>,
}

impl<S, M, C> KmcController<S, M, C, StdRng>
where
    S: SaddleSearcher,
    M: Minimizer,
    C: ConfigurationStore,
{
    /// Creates a controller seeded from `config.seed`.
    ///
    /// The initial minimum is saved under step index `state.step_counter`.
    pub fn new(
        config: KmcConfig,
        state: KmcState,
        searcher: S,
        minimizer: M,
        store: C,
    ) -> Result<Self, StepError> {
        let rng = seeded_rng(config.seed);
        Self::with_rng(config, state, searcher, minimizer, store, rng)
    }

    /// Creates a controller from a checkpoint file.
    pub fn resume(checkpoint: &Path, searcher: S, minimizer: M, store: C) -> Result<Self, StepError> {
        let loaded = Checkpoint::load(checkpoint)?;
        info!(
            "Resuming from {} at step {} (t = {:e})",
            checkpoint.display(),
            loaded.state.step_counter,
            loaded.state.elapsed_time
        );
        Self::new(loaded.config, loaded.state, searcher, minimizer, store)
    }
}

impl<S, M, C, R> KmcController<S, M, C, R>
where
    S: SaddleSearcher,
    M: Minimizer,
    C: ConfigurationStore,
    R: Rng,
{
    /// Creates a controller drawing from `rng`.
    pub fn with_rng(
        config: KmcConfig,
        state: KmcState,
        searcher: S,
        minimizer: M,
        store: C,
        rng: R,
    ) -> Result<Self, StepError> {
        let checkpoint_path = config.checkpoint_file.as_ref().map(PathBuf::from);
        let pipeline = StepPipeline::new(config)?;
        pipeline.store_current(&store, &state)?;
        Ok(Self {
            pipeline,
            searcher,
            minimizer,
            store,
            rng,
            state,
            phase: StepPhase::Idle,
            checkpoint_path,
        })
    }

    /// Current state.
    pub fn state(&self) -> &KmcState {
        &self.state
    }

    /// Phase reached by the last step (where it stopped, if it failed).
    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    /// Run parameters.
    pub fn config(&self) -> &KmcConfig {
        &self.pipeline.config
    }

    /// Store holding the run outputs.
    pub fn store(&self) -> &C {
        &self.store
    }

    /// Performs one KMC step.
    pub fn step(&mut self) -> Result<StepReport, StepError> {
        let step = self.state.step_counter;

        self.phase = StepPhase::Searching;
        let (candidates, attempts) = self.search(step)?;
        info!(
            "Step {}: {} unique saddles from {} attempts",
            step,
            candidates.len(),
            attempts
        );

        self.phase = StepPhase::RateSelection;
        let selection = self.pipeline.select(&candidates, &self.state, &mut self.rng)?;
        let chosen = candidates
            .get(selection.index)
            .ok_or(RateError::NoViableTransition {
                candidates: candidates.len(),
                rate_sum: selection.rate_sum,
            })?;

        self.phase = StepPhase::Descending;
        let phase = &mut self.phase;
        let descent = self.pipeline.descend(
            &mut self.minimizer,
            &self.store,
            step,
            chosen,
            || *phase = StepPhase::DescendingRetry,
        )?;

        self.state = self.pipeline.commit(
            &self.store,
            &self.state,
            descent.minimum,
            selection.time_increment,
            self.checkpoint_path.as_deref(),
        )?;
        self.phase = StepPhase::Committed;

        info!(
            "Step {} committed: E = {:.6}, t = {:e}",
            self.state.step_counter, self.state.minimum_energy, self.state.elapsed_time
        );
        Ok(StepReport {
            step: self.state.step_counter,
            attempts,
            candidates: candidates.len(),
            selected: selection.index,
            rate_sum: selection.rate_sum,
            time_increment: selection.time_increment,
            elapsed_time: self.state.elapsed_time,
            retried: descent.retried,
        })
    }

    /// Performs `steps` KMC steps, stopping at the first error.
    pub fn run(&mut self, steps: usize) -> Result<Vec<StepReport>, StepError> {
        (0..steps).map(|_| self.step()).collect()
    }

    fn search(&mut self, step: usize) -> Result<(CandidateSet, usize), StepError> {
        let config = &self.pipeline.config;
        let mut candidates = CandidateSet::new(config.search_limit);
        let start_name = self.pipeline.naming.minimum(step);
        let mut attempts = 0;

        while !candidates.is_full() && attempts < config.max_search_attempts {
            attempts += 1;
            let start = self.store.load(&start_name)?;
            let perturbed = start.perturbed(&mut self.rng, config.max_perturbation);

            let found = match self.searcher.reset(&perturbed) {
                Ok(()) => drive_search(&mut self.searcher, config.search_iterations),
                Err(e) => Err(e),
            };
            let result = match found {
                Ok(Some(result)) => result,
                Ok(None) => {
                    debug!("Search attempt {} did not converge", attempts);
                    continue;
                }
                Err(e) => {
                    self.pipeline.absorb_search_error(e)?;
                    continue;
                }
            };

            let name = self.pipeline.naming.candidate_saddle(candidates.len());
            let particles = self.state.positions.num_atoms();
            self.pipeline
                .offer_candidate(&self.store, &mut candidates, result, name, particles, true)?;
        }

        Ok((candidates, attempts))
    }
}
