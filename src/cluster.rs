//! KMC steps with saddle searches delegated to worker processes.
//!
//! The coordinator and its workers share one working directory and synchronize
//! through empty flag files:
//!
//! ```text
//! coordinator                          worker <id>
//! -----------                          -----------
//! save current.pos
//! remove <id>.go, <id>.done, s_<id>_*
//! touch <id>.go            ------->    sees <id>.go, runs one search
//!                                      writes s_<id>_saddle.pos, s_<id>_ev
//! poll every <id>.done     <-------    touches <id>.done
//! remove <id>.go, <id>.done
//! harvest s_<id>_* results
//! ```
//!
//! The rate selection, descent and commit that follow are the same as in the
//! single-process [`KmcController`](crate::controller::KmcController). After the
//! commit the elapsed time and the mean squared displacement from the initial
//! configuration are appended to `tau-msd.dat`.
//!
//! Waiting is bounded by a configurable deadline and can be interrupted from
//! another thread through a [`CancelToken`].

use crate::cleanup::{CleanupError, CleanupManager};
use crate::config::{ClusterConfig, KmcConfig};
use crate::controller::{seeded_rng, StepError, StepPhase, StepPipeline, StepReport};
use crate::geometry::{Configuration, SearchResult};
use crate::io;
use crate::naming::{FileNaming, TAU_MSD_LOG, WORKER_START_CONFIG};
use crate::rates::RateError;
use crate::search::Minimizer;
use crate::state::KmcState;
use crate::store::{ConfigurationStore, FileStore, StoreError};
use crate::uniqueness::CandidateSet;
use log::{debug, info, warn};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors of the worker protocol.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Not every worker raised its completion flag before the deadline
    #[error("workers {pending:?} did not finish within {waited:?}")]
    WorkerTimeout {
        /// Ids of the workers still running
        pending: Vec<usize>,
        /// Time spent waiting
        waited: Duration,
    },
    /// Waiting was cancelled
    #[error("cancelled while waiting for workers {pending:?}")]
    Cancelled {
        /// Ids of the workers still running
        pending: Vec<usize>,
    },
    /// A flag file could not be created
    #[error("IO error on {path}: {source}")]
    Io {
        /// Flag file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// Flag or result files could not be removed
    #[error(transparent)]
    Cleanup(#[from] CleanupError),
}

/// A worker's result files could not be used.
///
/// Kept apart from zero-energy sentinel results: a worker that wrote nothing is
/// reported here, a worker that wrote an empty result is a candidate without rate.
#[derive(Error, Debug)]
#[error("result of worker {id} unusable: {source}")]
pub struct WorkerResultError {
    /// Worker id
    pub id: usize,
    /// Store failure
    #[source]
    pub source: StoreError,
}

impl WorkerResultError {
    /// Returns `true` when the worker wrote no result at all.
    pub fn is_missing(&self) -> bool {
        matches!(self.source, StoreError::NotFound(_))
    }
}

/// Shared flag that interrupts polling loops.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of collecting the worker results of one step.
#[derive(Debug, Default)]
pub struct HarvestReport {
    /// Results accepted as candidates
    pub accepted: usize,
    /// Results rejected as duplicates or invalid
    pub rejected: usize,
    /// Workers whose results could not be read
    pub errors: Vec<WorkerResultError>,
}

impl HarvestReport {
    /// Ids of the workers that wrote no result.
    pub fn missing(&self) -> Vec<usize> {
        self.errors
            .iter()
            .filter(|e| e.is_missing())
            .map(|e| e.id)
            .collect()
    }
}

/// Summary of one cluster step.
#[derive(Debug)]
pub struct ClusterStepReport {
    /// Pipeline summary
    pub report: StepReport,
    /// Result collection summary
    pub harvest: HarvestReport,
    /// Mean squared displacement per axis from the initial configuration
    pub msd: Vector3<f64>,
}

/// Flag-file handling for a fixed set of workers.
pub struct WorkerPool {
    dir: PathBuf,
    workers: usize,
    poll_interval: Duration,
    deadline: Option<Duration>,
    naming: FileNaming,
    cleanup: CleanupManager,
}

impl WorkerPool {
    /// Creates a pool of `config.workers` workers in `dir`.
    pub fn new(dir: &Path, config: &ClusterConfig) -> Self {
        Self {
            dir: dir.to_path_buf(),
            workers: config.workers,
            poll_interval: config.poll_interval(),
            deadline: config.worker_deadline(),
            naming: FileNaming::new(),
            cleanup: CleanupManager::new(dir),
        }
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Shared working directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Removes leftover flags and results, then raises every dispatch flag.
    ///
    /// A worker that finished after the previous wait gave up may have raised its
    /// completion flag late; that flag must not count for the new job.
    pub fn dispatch(&self) -> Result<(), ClusterError> {
        let late = self.cleanup.remove_flags(self.workers)?;
        if late > 0 {
            debug!("Removed {} leftover flag files", late);
        }
        let stale = self.cleanup.remove_worker_results(self.workers)?;
        if stale > 0 {
            debug!("Removed {} stale worker result files", stale);
        }
        for id in 0..self.workers {
            let path = self.dir.join(self.naming.go_flag(id));
            io::touch(&path).map_err(|source| ClusterError::Io { path, source })?;
        }
        info!("Dispatched {} workers", self.workers);
        Ok(())
    }

    /// Ids of the workers whose completion flag is absent.
    pub fn pending(&self) -> Vec<usize> {
        (0..self.workers)
            .filter(|&id| !self.dir.join(self.naming.done_flag(id)).exists())
            .collect()
    }

    /// Blocks until a single pass sees every completion flag.
    ///
    /// On timeout or cancellation the flags are removed so that workers do not
    /// pick up the abandoned job.
    pub fn wait_for_workers(&self, cancel: &CancelToken) -> Result<(), ClusterError> {
        let started = Instant::now();
        loop {
            let pending = self.pending();
            if pending.is_empty() {
                debug!("All {} workers finished after {:?}", self.workers, started.elapsed());
                return Ok(());
            }
            if cancel.is_cancelled() {
                self.clear_flags()?;
                return Err(ClusterError::Cancelled { pending });
            }

            let waited = started.elapsed();
            let mut nap = self.poll_interval;
            if let Some(deadline) = self.deadline {
                if waited >= deadline {
                    self.clear_flags()?;
                    warn!("Workers {:?} missed the deadline of {:?}", pending, deadline);
                    return Err(ClusterError::WorkerTimeout { pending, waited });
                }
                nap = nap.min(deadline - waited);
            }
            debug!("Waiting for {} of {} workers", pending.len(), self.workers);
            thread::sleep(nap);
        }
    }

    /// Removes every dispatch and completion flag.
    pub fn clear_flags(&self) -> Result<usize, ClusterError> {
        Ok(self.cleanup.remove_flags(self.workers)?)
    }

    /// Removes protocol files left behind by an interrupted run.
    pub fn sweep(&self) -> Result<(), ClusterError> {
        self.cleanup.sweep()?;
        Ok(())
    }
}

/// Runs KMC steps whose saddle searches are performed by external workers.
///
/// Descents still run in the coordinating process through the minimizer `M`.
pub struct ClusterController<M, R = StdRng> {
    pipeline: StepPipeline,
    pool: WorkerPool,
    store: FileStore,
    minimizer: M,
    rng: R,
    state: KmcState,
    initial: Configuration,
    phase: StepPhase,
    cancel: CancelToken,
    checkpoint_path: Option<PathBuf>,
}

impl<M: Minimizer> ClusterController<M, StdRng> {
    /// Creates a coordinator seeded from `config.seed`.
    pub fn new(
        config: KmcConfig,
        cluster: &ClusterConfig,
        state: KmcState,
        minimizer: M,
    ) -> Result<Self, StepError> {
        let rng = seeded_rng(config.seed);
        Self::with_rng(config, cluster, state, minimizer, rng)
    }
}

impl<M: Minimizer, R: Rng> ClusterController<M, R> {
    /// Creates a coordinator drawing from `rng`.
    ///
    /// Stale flags and results in the working directory are swept first.
    pub fn with_rng(
        config: KmcConfig,
        cluster: &ClusterConfig,
        state: KmcState,
        minimizer: M,
        rng: R,
    ) -> Result<Self, StepError> {
        cluster.validate().map_err(StepError::InvalidConfig)?;
        let dir = PathBuf::from(&cluster.work_dir);
        let checkpoint_path = config.checkpoint_file.as_ref().map(|f| dir.join(f));
        let pipeline = StepPipeline::new(config)?;
        let store = FileStore::open(&dir)?;
        let pool = WorkerPool::new(&dir, cluster);
        pool.sweep()?;

        pipeline.store_current(&store, &state)?;
        let initial = match store.load(&pipeline.naming.minimum(0)) {
            Ok(initial) => initial,
            Err(StoreError::NotFound(_)) => state.positions.clone(),
            Err(e) => return Err(e.into()),
        };

        info!(
            "Cluster controller ready in {} with {} workers",
            dir.display(),
            pool.workers()
        );
        Ok(Self {
            pipeline,
            pool,
            store,
            minimizer,
            rng,
            state,
            initial,
            phase: StepPhase::Idle,
            cancel: CancelToken::new(),
            checkpoint_path,
        })
    }

    /// Current state.
    pub fn state(&self) -> &KmcState {
        &self.state
    }

    /// Phase reached by the last step.
    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    /// Flag-file handling.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Store rooted at the working directory.
    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Token that interrupts the wait for workers when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Performs one KMC step.
    pub fn step(&mut self) -> Result<ClusterStepReport, StepError> {
        let step = self.state.step_counter;

        self.phase = StepPhase::Searching;
        self.store.save(WORKER_START_CONFIG, &self.state.positions)?;
        self.pool.dispatch()?;
        self.pool.wait_for_workers(&self.cancel)?;
        self.pool.clear_flags()?;

        let mut candidates = CandidateSet::new(self.pool.workers());
        let harvest = self.harvest(&mut candidates)?;
        info!(
            "Step {}: {} unique saddles from {} workers ({} unusable)",
            step,
            candidates.len(),
            self.pool.workers(),
            harvest.errors.len()
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

        let committed = self.pipeline.commit(
            &self.store,
            &self.state,
            descent.minimum,
            selection.time_increment,
            self.checkpoint_path.as_deref(),
        )?;

        let msd = committed.positions.mean_squared_displacement(&self.initial);
        io::append_tau_msd(
            &self.pool.dir().join(TAU_MSD_LOG),
            committed.step_counter,
            committed.elapsed_time,
            &msd,
        )?;

        self.state = committed;
        self.phase = StepPhase::Committed;
        info!(
            "Step {} committed: E = {:.6}, t = {:e}",
            self.state.step_counter, self.state.minimum_energy, self.state.elapsed_time
        );

        Ok(ClusterStepReport {
            report: StepReport {
                step: self.state.step_counter,
                attempts: self.pool.workers(),
                candidates: candidates.len(),
                selected: selection.index,
                rate_sum: selection.rate_sum,
                time_increment: selection.time_increment,
                elapsed_time: self.state.elapsed_time,
                retried: descent.retried,
            },
            harvest,
            msd,
        })
    }

    /// Reads every worker's result and offers it to the candidate set.
    fn harvest(&self, candidates: &mut CandidateSet) -> Result<HarvestReport, StepError> {
        let naming = &self.pipeline.naming;
        let mut report = HarvestReport::default();

        for id in 0..self.pool.workers() {
            let saddle_name = naming.worker_saddle(id);
            let loaded = self
                .store
                .load_record(&naming.worker_record(id))
                .and_then(|record| {
                    self.store.load(&saddle_name).map(|positions| SearchResult {
                        saddle_energy: record.energy,
                        vibrational_prefactor: record.vibrational_prefactor,
                        saddle_positions: positions,
                    })
                });

            let particles = self.state.positions.num_atoms();
            let loaded = loaded.and_then(|result| {
                let found = result.saddle_positions.num_atoms();
                if found == particles {
                    Ok(result)
                } else {
                    Err(StoreError::Malformed {
                        name: saddle_name.clone(),
                        reason: format!("{} particles, expected {}", found, particles),
                    })
                }
            });

            let result = match loaded {
                Ok(result) => result,
                Err(source) => {
                    let err = WorkerResultError { id, source };
                    warn!("{}", err);
                    report.errors.push(err);
                    continue;
                }
            };

            if self
                .pipeline
                .offer_candidate(&self.store, candidates, result, saddle_name, particles, false)?
            {
                report.accepted += 1;
            } else {
                report.rejected += 1;
            }
        }

        Ok(report)
    }
}
