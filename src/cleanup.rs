//! Removal of worker-protocol files from the shared working directory.
//!
//! The cluster controller and its workers communicate through small files:
//!
//! - **Dispatch flags**: `<id>.go`
//! - **Completion flags**: `<id>.done`
//! - **Worker results**: `s_<id>_ev` and `s_<id>_saddle.pos`
//!
//! Flags are reset after every harvest and results are removed before every
//! dispatch, so a worker that fails to write anything cannot be mistaken for one
//! that succeeded in an earlier step. At start-up, files left behind by an
//! interrupted run are swept by name pattern.
//!
//! # Error Handling
//!
//! Removing a file that does not exist is not an error. Any other failure is
//! returned, since leftover flags would make the next poll pass succeed early.

use crate::naming::FileNaming;
use crate::store::POSITIONS_EXTENSION;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

lazy_static! {
    // "<id>.go" or "<id>.done"
    static ref FLAG_RE: Regex = Regex::new(r"^(\d+)\.(go|done)$").unwrap();

    // "s_<id>_ev" or "s_<id>_saddle.pos"
    static ref RESULT_RE: Regex = Regex::new(r"^s_(\d+)_(ev|saddle\.pos)$").unwrap();
}

/// Errors that can occur during cleanup operations.
#[derive(Error, Debug)]
pub enum CleanupError {
    /// I/O error during file operations
    #[error("IO error on {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Invalid path error
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Result type for cleanup operations
pub type Result<T> = std::result::Result<T, CleanupError>;

/// Kind of protocol file recognised by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFile {
    /// `<id>.go` or `<id>.done`
    Flag(usize),
    /// `s_<id>_ev` or `s_<id>_saddle.pos`
    WorkerResult(usize),
}

/// Classifies a file name as a protocol file, returning the worker id.
///
/// # Examples
///
/// ```
/// use okmc::cleanup::{classify_file, ProtocolFile};
///
/// assert_eq!(classify_file("3.go"), Some(ProtocolFile::Flag(3)));
/// assert_eq!(classify_file("s_12_ev"), Some(ProtocolFile::WorkerResult(12)));
/// assert_eq!(classify_file("12_ev"), None);
/// ```
pub fn classify_file(filename: &str) -> Option<ProtocolFile> {
    if let Some(caps) = FLAG_RE.captures(filename) {
        return caps[1].parse().ok().map(ProtocolFile::Flag);
    }
    if let Some(caps) = RESULT_RE.captures(filename) {
        return caps[1].parse().ok().map(ProtocolFile::WorkerResult);
    }
    None
}

/// Summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    /// Flag files removed
    pub flags_removed: usize,
    /// Worker result files removed
    pub results_removed: usize,
}

/// Manages removal of protocol files in one working directory.
pub struct CleanupManager {
    directory: PathBuf,
    naming: FileNaming,
}

impl CleanupManager {
    /// Creates a cleanup manager for `directory`.
    pub fn new(directory: &Path) -> Self {
        Self {
            directory: directory.to_path_buf(),
            naming: FileNaming::new(),
        }
    }

    /// Working directory handled by this manager.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Removes one file; returns `true` if it existed.
    pub fn remove_file(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!("Removed {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CleanupError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Removes the `.go` and `.done` flags of workers `0..workers`.
    ///
    /// Returns the number of files removed.
    pub fn remove_flags(&self, workers: usize) -> Result<usize> {
        let mut removed = 0;
        for id in 0..workers {
            for name in [self.naming.go_flag(id), self.naming.done_flag(id)] {
                if self.remove_file(&self.directory.join(name))? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Removes the result files of workers `0..workers`.
    ///
    /// Returns the number of files removed.
    pub fn remove_worker_results(&self, workers: usize) -> Result<usize> {
        let mut removed = 0;
        for id in 0..workers {
            let record = self.directory.join(self.naming.worker_record(id));
            let saddle = self.directory.join(format!(
                "{}.{}",
                self.naming.worker_saddle(id),
                POSITIONS_EXTENSION
            ));
            for path in [record, saddle] {
                if self.remove_file(&path)? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Removes every protocol file in the directory, whatever its worker id.
    ///
    /// Used at start-up to discard flags and results of an interrupted run.
    pub fn sweep(&self) -> Result<CleanupSummary> {
        if !self.directory.exists() {
            debug!(
                "Directory does not exist, skipping sweep: {}",
                self.directory.display()
            );
            return Ok(CleanupSummary::default());
        }
        if !self.directory.is_dir() {
            return Err(CleanupError::InvalidPath(format!(
                "Path is not a directory: {}",
                self.directory.display()
            )));
        }

        let entries = fs::read_dir(&self.directory).map_err(|source| CleanupError::Io {
            path: self.directory.clone(),
            source,
        })?;

        let mut summary = CleanupSummary::default();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Error reading directory entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let filename = match path.file_name().and_then(|s| s.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            match classify_file(&filename) {
                Some(ProtocolFile::Flag(_)) => {
                    if self.remove_file(&path)? {
                        summary.flags_removed += 1;
                    }
                }
                Some(ProtocolFile::WorkerResult(_)) => {
                    if self.remove_file(&path)? {
                        summary.results_removed += 1;
                    }
                }
                None => {}
            }
        }

        if summary.flags_removed + summary.results_removed > 0 {
            info!(
                "Swept {} stale flags and {} stale worker results from {}",
                summary.flags_removed,
                summary.results_removed,
                self.directory.display()
            );
        }
        Ok(summary)
    }
}
