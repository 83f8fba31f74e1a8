#![deny(missing_docs)]

//! OpenKMC - Kinetic Monte Carlo Transition Search and Rate Selection
//!
//! OpenKMC drives off-lattice Kinetic Monte Carlo (KMC) simulations: it discovers
//! the transitions out of the current energy minimum with repeated saddle-point
//! searches, turns them into rates with harmonic transition-state theory (hTST),
//! picks the next event with the Bortz-Kalos-Lebowitz (BKL) algorithm and advances
//! the simulated clock.
//!
//! # Overview
//!
//! One KMC step proceeds through five phases:
//!
//! 1. **Searching**: saddle searches from randomly perturbed copies of the current
//!    minimum, keeping only saddles that differ from the ones already found
//! 2. **RateSelection**: hTST rates and the BKL draw
//! 3. **Descending**: minimization from the chosen saddle
//! 4. **DescendingRetry**: minimization from the other side of the saddle when the
//!    first descent fell back into the starting basin
//! 5. **Committed**: the new minimum becomes the current state
//!
//! # Rate Model
//!
//! ```text
//! k_i = (nu_min / nu_i / m) * exp(-(E_i - E_min) / (k_B T))
//! dt  = -ln(u1) / sum(k)
//! ```
//!
//! A saddle energy of exactly zero marks a candidate without data; it never
//! receives a rate.
//!
//! # Execution Models
//!
//! - **Single process**: [`KmcController`] drives the searcher and minimizer itself.
//! - **Cluster**: [`ClusterController`] dispatches searches to [`Worker`]s in other
//!   processes through flag files (`<id>.go`, `<id>.done`) in a shared directory
//!   and harvests their results (`s_<id>_saddle.pos`, `s_<id>_ev`).
//!
//! The saddle-search method (e.g. dimer) and the minimizer are supplied by the
//! caller through the [`SaddleSearcher`] and [`Minimizer`] traits.
//!
//! # Quick Start
//!
//! ```no_run
//! use okmc::geometry::{Configuration, MinimumResult, SearchResult};
//! use okmc::search::{DescentSide, Minimizer, SaddleSearcher};
//! use okmc::settings::{init_logging, SettingsManager};
//! use okmc::state::KmcState;
//! use okmc::store::FileStore;
//! use okmc::KmcController;
//! use std::path::Path;
//!
//! # struct Dimer;
//! # impl SaddleSearcher for Dimer {
//! #     fn reset(&mut self, _: &Configuration) -> okmc::search::Result<()> { Ok(()) }
//! #     fn step(&mut self) -> okmc::search::Result<Option<SearchResult>> { Ok(None) }
//! # }
//! # struct Cg;
//! # impl Minimizer for Cg {
//! #     fn reset(&mut self, _: &Configuration, _: DescentSide) -> okmc::search::Result<()> { Ok(()) }
//! #     fn step(&mut self) -> okmc::search::Result<bool> { Ok(true) }
//! #     fn current(&self) -> MinimumResult { unimplemented!() }
//! # }
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = SettingsManager::load()?;
//!     init_logging(settings.logging())?;
//!
//!     let start = Configuration::from_flat(&[0.0, 0.0, 0.0, 2.5, 0.0, 0.0]);
//!     let state = KmcState::new(start, -3.2, 1.0e13);
//!     let store = FileStore::open(Path::new("run"))?;
//!
//!     let mut kmc = KmcController::new(settings.kmc().clone(), state, Dimer, Cg, store)?;
//!     for report in kmc.run(100)? {
//!         println!("step {}: t = {:e}", report.step, report.elapsed_time);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`geometry`](geometry/index.html) - Particle configurations and search results
//! - [`store`](store/index.html) - Named persistence of configurations and energy records
//! - [`search`](search/index.html) - Saddle-search and minimizer interfaces
//! - [`uniqueness`](uniqueness/index.html) - Candidate set and saddle deduplication
//! - [`classifier`](classifier/index.html) - Basin classification of descent endpoints
//! - [`rates`](rates/index.html) - hTST rates and BKL selection
//! - [`controller`](controller/index.html) - Single-process step controller
//! - [`cluster`](cluster/index.html) - Worker-coordinating step controller
//! - [`worker`](worker/index.html) - Worker side of the flag-file protocol
//! - [`checkpoint`](checkpoint/index.html) - Restart functionality
//! - [`settings`](settings/index.html) - INI configuration and logging setup
//!
//! # References
//!
//! - Bortz, A. B.; Kalos, M. H.; Lebowitz, J. L.
//!   *J. Comput. Phys.* **1975**, 17, 10-18.
//! - Henkelman, G.; Jónsson, H.
//!   *J. Chem. Phys.* **2001**, 115, 9657-9666.
//!
//! # License
//!
//! MIT License

/// Restart functionality
pub mod checkpoint;
pub mod classifier;
/// Removal of worker-protocol files
pub mod cleanup;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod geometry;
pub mod io;
/// Store keys and protocol file names
pub mod naming;
pub mod rates;
pub mod search;
/// Configuration management system
pub mod settings;
pub mod state;
pub mod store;
pub mod uniqueness;
pub mod worker;

pub use cluster::ClusterController;
pub use config::{ClusterConfig, KmcConfig};
pub use controller::{KmcController, StepError, StepReport};
pub use geometry::{Configuration, MinimumResult, SearchResult};
pub use search::{Minimizer, SaddleSearcher};
pub use state::KmcState;
pub use worker::Worker;
