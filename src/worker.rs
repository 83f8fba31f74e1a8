//! Worker side of the filesystem protocol.
//!
//! A worker owns one id. It waits until its dispatch flag `<id>.go` appears while
//! its completion flag `<id>.done` is absent, runs a single saddle search from a
//! perturbed copy of `current`, writes `s_<id>_saddle` and `s_<id>_ev` when the
//! search converged, and raises `<id>.done`. The completion flag is raised whatever
//! the outcome, so the coordinator never waits on a worker that gave up.
//!
//! A search that does not converge, or whose start configuration overlaps, leaves
//! no result files; the coordinator reports that worker as missing.

use crate::cluster::CancelToken;
use crate::config::KmcConfig;
use crate::controller::seeded_rng;
use crate::geometry::SearchResult;
use crate::io::{self, EnergyRecord};
use crate::naming::{FileNaming, WORKER_START_CONFIG};
use crate::search::{drive_search, SaddleSearcher, SearchError};
use crate::store::{ConfigurationStore, FileStore, StoreError};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised on the worker side.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Start configuration or result files could not be accessed
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// The searcher failed
    #[error("search error: {0}")]
    Search(#[from] SearchError),
    /// A flag file could not be created
    #[error("IO error on {path}: {source}")]
    Io {
        /// Flag file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// No dispatch arrived before the deadline
    #[error("no dispatch within {0:?}")]
    Timeout(Duration),
    /// Waiting was cancelled
    #[error("cancelled")]
    Cancelled,
}

/// Outcome of one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The search converged and its result was written
    Saddle(SearchResult),
    /// The search ran out of iterations
    NotConverged,
    /// The start configuration overlapped
    Skipped(String),
}

/// One worker process (or thread) serving a single id.
pub struct Worker<S, R = StdRng> {
    id: usize,
    dir: PathBuf,
    store: FileStore,
    searcher: S,
    rng: R,
    naming: FileNaming,
    search_iterations: usize,
    max_perturbation: f64,
}

impl<S: SaddleSearcher> Worker<S, StdRng> {
    /// Creates worker `id` in `work_dir`.
    ///
    /// With a configured seed every worker gets its own stream derived from it.
    pub fn new(id: usize, work_dir: &Path, config: &KmcConfig, searcher: S) -> Result<Self, WorkerError> {
        let seed = config
            .seed
            .map(|s| s ^ (id as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        Self::with_rng(id, work_dir, config, searcher, seeded_rng(seed))
    }
}

impl<S: SaddleSearcher, R: Rng> Worker<S, R> {
    /// Creates worker `id` drawing from `rng`.
    pub fn with_rng(
        id: usize,
        work_dir: &Path,
        config: &KmcConfig,
        searcher: S,
        rng: R,
    ) -> Result<Self, WorkerError> {
        Ok(Self {
            id,
            dir: work_dir.to_path_buf(),
            store: FileStore::open(work_dir)?,
            searcher,
            rng,
            naming: FileNaming::new(),
            search_iterations: config.search_iterations,
            max_perturbation: config.max_perturbation,
        })
    }

    /// Worker id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns `true` when a job is waiting for this worker.
    pub fn is_dispatched(&self) -> bool {
        self.dir.join(self.naming.go_flag(self.id)).exists()
            && !self.dir.join(self.naming.done_flag(self.id)).exists()
    }

    /// Blocks until a job is dispatched to this worker.
    pub fn wait_for_dispatch(
        &self,
        poll_interval: Duration,
        deadline: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<(), WorkerError> {
        let started = Instant::now();
        loop {
            if self.is_dispatched() {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(WorkerError::Cancelled);
            }
            let waited = started.elapsed();
            let mut nap = poll_interval;
            if let Some(deadline) = deadline {
                if waited >= deadline {
                    return Err(WorkerError::Timeout(waited));
                }
                nap = nap.min(deadline - waited);
            }
            thread::sleep(nap);
        }
    }

    /// Runs the dispatched job and raises the completion flag.
    pub fn run_job(&mut self) -> Result<JobOutcome, WorkerError> {
        let outcome = self.attempt();
        let done = self.dir.join(self.naming.done_flag(self.id));
        io::touch(&done).map_err(|source| WorkerError::Io { path: done, source })?;
        match &outcome {
            Ok(JobOutcome::Saddle(result)) => {
                info!("Worker {}: saddle at E = {:.6}", self.id, result.saddle_energy)
            }
            Ok(JobOutcome::NotConverged) => info!("Worker {}: search did not converge", self.id),
            Ok(JobOutcome::Skipped(reason)) => warn!("Worker {}: skipped job: {}", self.id, reason),
            Err(e) => warn!("Worker {}: job failed: {}", self.id, e),
        }
        outcome
    }

    /// Serves jobs until cancelled; returns the number of jobs run.
    pub fn serve(&mut self, poll_interval: Duration, cancel: &CancelToken) -> Result<usize, WorkerError> {
        let mut jobs = 0;
        loop {
            match self.wait_for_dispatch(poll_interval, None, cancel) {
                Ok(()) => {}
                Err(WorkerError::Cancelled) => return Ok(jobs),
                Err(e) => return Err(e),
            }
            self.run_job()?;
            jobs += 1;
        }
    }

    fn attempt(&mut self) -> Result<JobOutcome, WorkerError> {
        let start = self.store.load(WORKER_START_CONFIG)?;
        let perturbed = start.perturbed(&mut self.rng, self.max_perturbation);

        let found = match self.searcher.reset(&perturbed) {
            Ok(()) => drive_search(&mut self.searcher, self.search_iterations),
            Err(e) => Err(e),
        };
        match found {
            Ok(Some(result)) => {
                self.store
                    .save(&self.naming.worker_saddle(self.id), &result.saddle_positions)?;
                self.store.save_record(
                    &self.naming.worker_record(self.id),
                    &EnergyRecord {
                        energy: result.saddle_energy,
                        vibrational_prefactor: result.vibrational_prefactor,
                    },
                )?;
                debug!("Worker {} wrote its result", self.id);
                Ok(JobOutcome::Saddle(result))
            }
            Ok(None) => Ok(JobOutcome::NotConverged),
            Err(SearchError::Overlap(reason)) => Ok(JobOutcome::Skipped(reason)),
            Err(e) => Err(e.into()),
        }
    }
}
