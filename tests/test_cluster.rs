// Cluster round trips with workers running in threads of the test process
use nalgebra::Vector3;
use okmc::checkpoint::Checkpoint;
use okmc::cluster::{CancelToken, ClusterController, ClusterError};
use okmc::config::{ClusterConfig, KmcConfig};
use okmc::controller::StepError;
use okmc::geometry::{Configuration, MinimumResult, SearchResult};
use okmc::search::{DescentSide, Minimizer, SaddleSearcher};
use okmc::state::KmcState;
use okmc::worker::Worker;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tempfile::TempDir;

fn two_atoms(x: f64) -> Configuration {
    Configuration::new(vec![Vector3::new(x, 0.0, 0.0), Vector3::new(5.0, 0.0, 0.0)])
}

/// Always converges on the same saddle.
struct FixedSaddle(Option<SearchResult>);

impl SaddleSearcher for FixedSaddle {
    fn reset(&mut self, _start: &Configuration) -> okmc::search::Result<()> {
        Ok(())
    }

    fn step(&mut self) -> okmc::search::Result<Option<SearchResult>> {
        Ok(self.0.clone())
    }
}

struct FollowMinimizer {
    positions: Configuration,
}

impl Minimizer for FollowMinimizer {
    fn reset(&mut self, saddle: &Configuration, _side: DescentSide) -> okmc::search::Result<()> {
        self.positions = saddle.clone();
        Ok(())
    }

    fn step(&mut self) -> okmc::search::Result<bool> {
        Ok(true)
    }

    fn current(&self) -> MinimumResult {
        MinimumResult {
            energy: -1.0,
            vibrational_prefactor: 1.0,
            positions: self.positions.clone(),
        }
    }
}

fn kmc_config() -> KmcConfig {
    KmcConfig {
        seed: Some(17),
        ..KmcConfig::default()
    }
}

fn cluster_config(dir: &Path, workers: usize, deadline_secs: f64) -> ClusterConfig {
    ClusterConfig {
        workers,
        work_dir: dir.display().to_string(),
        poll_interval_secs: 0.01,
        worker_deadline_secs: deadline_secs,
    }
}

/// Starts worker `id` in a thread; `converges` selects whether it finds a saddle.
fn spawn_worker(dir: &Path, id: usize, converges: bool, cancel: &CancelToken) -> JoinHandle<usize> {
    let dir: PathBuf = dir.to_path_buf();
    let cancel = cancel.clone();
    thread::spawn(move || {
        let result = if converges {
            Some(SearchResult {
                saddle_energy: -0.5 - 0.1 * id as f64,
                vibrational_prefactor: 1.0,
                saddle_positions: two_atoms(1.0 + id as f64),
            })
        } else {
            None
        };
        let mut worker = Worker::new(id, &dir, &kmc_config(), FixedSaddle(result)).unwrap();
        worker.serve(Duration::from_millis(5), &cancel).unwrap()
    })
}

/// Stands in for a worker that writes `files` verbatim once it is dispatched.
fn spawn_raw_worker(dir: &Path, id: usize, files: Vec<(&'static str, String)>) -> JoinHandle<()> {
    let dir: PathBuf = dir.to_path_buf();
    thread::spawn(move || {
        let go = dir.join(format!("{}.go", id));
        for _ in 0..1000 {
            if go.exists() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        for (name, content) in files {
            fs::write(dir.join(name), content).unwrap();
        }
        fs::write(dir.join(format!("{}.done", id)), "").unwrap();
    })
}

fn flag_files(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.ends_with(".go") || name.ends_with(".done"))
        .collect()
}

fn controller(dir: &Path, workers: usize, deadline_secs: f64) -> ClusterController<FollowMinimizer> {
    ClusterController::new(
        kmc_config(),
        &cluster_config(dir, workers, deadline_secs),
        KmcState::new(two_atoms(0.0), -1.0, 1.0),
        FollowMinimizer {
            positions: two_atoms(0.0),
        },
    )
    .unwrap()
}

#[test]
fn test_three_worker_round_trip() {
    let dir = TempDir::new().unwrap();
    let cancel = CancelToken::new();
    let mut kmc = controller(dir.path(), 3, 10.0);
    let handles: Vec<_> = (0..3)
        .map(|id| spawn_worker(dir.path(), id, true, &cancel))
        .collect();

    let first = kmc.step().unwrap();
    let second = kmc.step().unwrap();

    cancel.cancel();
    let jobs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(jobs, vec![2, 2, 2]);

    assert_eq!(first.harvest.accepted, 3);
    assert!(first.harvest.errors.is_empty());
    assert_eq!(first.report.candidates, 3);
    assert_eq!(second.report.step, 2);
    assert_eq!(kmc.state().step_counter, 2);
    assert!(flag_files(dir.path()).is_empty());
    assert!(dir.path().join("current.pos").exists());

    let log = fs::read_to_string(dir.path().join("tau-msd.dat")).unwrap();
    assert!(log.starts_with("-step 1\ntau: "));
    assert!(log.contains("-step 2\n"));
    assert_eq!(log.lines().filter(|l| l.starts_with("msd: ")).count(), 2);
}

#[test]
fn test_missing_worker_result_is_reported() {
    let dir = TempDir::new().unwrap();
    let cancel = CancelToken::new();
    let mut kmc = controller(dir.path(), 2, 10.0);
    let handles = vec![
        spawn_worker(dir.path(), 0, true, &cancel),
        spawn_worker(dir.path(), 1, false, &cancel),
    ];

    let report = kmc.step().unwrap();

    cancel.cancel();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(report.harvest.accepted, 1);
    assert_eq!(report.harvest.missing(), vec![1]);
    assert_eq!(report.report.selected, 0);
    assert_eq!(kmc.state().step_counter, 1);
    assert!(flag_files(dir.path()).is_empty());
}

#[test]
fn test_unresponsive_worker_times_out() {
    let dir = TempDir::new().unwrap();
    let cancel = CancelToken::new();
    let mut kmc = controller(dir.path(), 2, 0.3);
    // worker 1 never starts
    let handle = spawn_worker(dir.path(), 0, true, &cancel);

    let result = kmc.step();

    cancel.cancel();
    handle.join().unwrap();

    match result {
        Err(StepError::Cluster(ClusterError::WorkerTimeout { pending, .. })) => {
            assert_eq!(pending, vec![1])
        }
        other => panic!("expected timeout, got {:?}", other.map(|r| r.report)),
    }
    assert_eq!(kmc.state().step_counter, 0);
    assert!(flag_files(dir.path()).is_empty());
    assert!(!dir.path().join("tau-msd.dat").exists());
}

#[test]
fn test_cancelled_step() {
    let dir = TempDir::new().unwrap();
    let mut kmc = controller(dir.path(), 1, 0.0);
    kmc.cancel_token().cancel();

    assert!(matches!(
        kmc.step(),
        Err(StepError::Cluster(ClusterError::Cancelled { .. }))
    ));
    assert!(flag_files(dir.path()).is_empty());
}

#[test]
fn test_stale_flags_are_swept_at_start() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("4.go"), "").unwrap();
    fs::write(dir.path().join("4.done"), "").unwrap();
    fs::write(dir.path().join("s_4_ev"), "-1.0\n1.0\n").unwrap();

    let _kmc = controller(dir.path(), 2, 1.0);

    assert!(flag_files(dir.path()).is_empty());
    assert!(!dir.path().join("s_4_ev").exists());
    assert!(dir.path().join("0.pos").exists());
}

#[test]
fn test_malformed_worker_result_is_excluded() {
    let dir = TempDir::new().unwrap();
    let cancel = CancelToken::new();
    let mut kmc = controller(dir.path(), 2, 10.0);
    let good = spawn_worker(dir.path(), 0, true, &cancel);
    let bad = spawn_raw_worker(
        dir.path(),
        1,
        vec![
            ("s_1_saddle.pos", "2.0 0.0 0.0\n5.0 0.0 0.0\n".to_string()),
            ("s_1_ev", "not-a-number\n1.0\n".to_string()),
        ],
    );

    let report = kmc.step().unwrap();

    cancel.cancel();
    good.join().unwrap();
    bad.join().unwrap();

    assert_eq!(report.harvest.accepted, 1);
    assert_eq!(report.harvest.errors.len(), 1);
    assert_eq!(report.harvest.errors[0].id, 1);
    assert!(!report.harvest.errors[0].is_missing());
    assert!(report.harvest.missing().is_empty());
    assert_eq!(report.report.candidates, 1);
    assert_eq!(report.report.selected, 0);
    assert_eq!(kmc.state().step_counter, 1);
}

#[test]
fn test_worker_saddle_with_wrong_particle_count_is_excluded() {
    let dir = TempDir::new().unwrap();
    let cancel = CancelToken::new();
    let mut kmc = controller(dir.path(), 2, 10.0);
    let good = spawn_worker(dir.path(), 0, true, &cancel);
    let bad = spawn_raw_worker(
        dir.path(),
        1,
        vec![
            (
                "s_1_saddle.pos",
                "2.0 0.0 0.0\n5.0 0.0 0.0\n7.0 0.0 0.0\n".to_string(),
            ),
            ("s_1_ev", "-0.9\n1.0\n".to_string()),
        ],
    );

    let report = kmc.step().unwrap();

    cancel.cancel();
    good.join().unwrap();
    bad.join().unwrap();

    assert_eq!(report.harvest.accepted, 1);
    assert_eq!(report.harvest.errors.len(), 1);
    let err = &report.harvest.errors[0];
    assert_eq!(err.id, 1);
    assert!(!err.is_missing());
    assert!(err.to_string().contains("3 particles, expected 2"));
    assert_eq!(kmc.state().positions.num_atoms(), 2);
}

#[test]
fn test_relative_checkpoint_is_written_to_work_dir() {
    let dir = TempDir::new().unwrap();
    let cancel = CancelToken::new();
    let config = KmcConfig {
        checkpoint_file: Some("kmc.chk".to_string()),
        ..kmc_config()
    };
    let mut kmc = ClusterController::new(
        config,
        &cluster_config(dir.path(), 1, 10.0),
        KmcState::new(two_atoms(0.0), -1.0, 1.0),
        FollowMinimizer {
            positions: two_atoms(0.0),
        },
    )
    .unwrap();
    let handle = spawn_worker(dir.path(), 0, true, &cancel);

    kmc.step().unwrap();

    cancel.cancel();
    handle.join().unwrap();

    let loaded = Checkpoint::load(&dir.path().join("kmc.chk")).unwrap();
    assert_eq!(&loaded.state, kmc.state());
}
