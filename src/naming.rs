//! Store keys and file names used by the KMC engine and its workers.
//!
//! Step outputs are keyed by the step index and may carry an optional run prefix so
//! that several runs can share a store directory. Names that belong to the worker
//! protocol (`<id>.go`, `<id>.done`, `s_<id>_saddle`, `s_<id>_ev`, `current`) are
//! never prefixed, because unmodified external workers rely on them.
//!
//! # Example
//!
//! ```
//! use okmc::naming::FileNaming;
//!
//! let naming = FileNaming::new();
//! assert_eq!(naming.minimum(4), "4");
//! assert_eq!(naming.step_saddle(4), "4_saddle");
//! assert_eq!(naming.go_flag(2), "2.go");
//!
//! let prefixed = FileNaming::with_prefix("run7");
//! assert_eq!(prefixed.energy_record(4), "run7_4_ev");
//! assert_eq!(prefixed.worker_saddle(2), "s_2_saddle");
//! ```

/// Name of the configuration workers load at the start of every job.
pub const WORKER_START_CONFIG: &str = "current";

/// Name of the run-level elapsed-time / mean-squared-displacement log.
pub const TAU_MSD_LOG: &str = "tau-msd.dat";

/// Generates store keys and protocol file names.
#[derive(Debug, Clone, Default)]
pub struct FileNaming {
    prefix: Option<String>,
}

impl FileNaming {
    /// Creates naming without a run prefix.
    pub fn new() -> Self {
        Self { prefix: None }
    }

    /// Creates naming whose step outputs start with `prefix`.
    ///
    /// An empty prefix is treated as no prefix.
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = prefix.trim();
        Self {
            prefix: if prefix.is_empty() {
                None
            } else {
                Some(prefix.to_string())
            },
        }
    }

    /// Returns the run prefix, if any
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    fn stepped(&self, body: String) -> String {
        match &self.prefix {
            Some(p) => format!("{}_{}", p, body),
            None => body,
        }
    }

    // Step outputs

    /// Minimum configuration committed at `step`.
    ///
    /// Format: `{step}`
    pub fn minimum(&self, step: usize) -> String {
        self.stepped(step.to_string())
    }

    /// Energy record of the minimum committed at `step`.
    ///
    /// Format: `{step}_ev`
    pub fn energy_record(&self, step: usize) -> String {
        self.stepped(format!("{}_ev", step))
    }

    /// Saddle chosen during `step`.
    ///
    /// Format: `{step}_saddle`
    pub fn step_saddle(&self, step: usize) -> String {
        self.stepped(format!("{}_saddle", step))
    }

    /// Forward-side descent endpoint of `step`.
    ///
    /// Format: `{step}_saddle_A_minimum`
    pub fn forward_minimum(&self, step: usize) -> String {
        self.stepped(format!("{}_saddle_A_minimum", step))
    }

    /// Reverse-side descent endpoint of `step`.
    ///
    /// Format: `{step}_saddle_B_minimum`
    pub fn reverse_minimum(&self, step: usize) -> String {
        self.stepped(format!("{}_saddle_B_minimum", step))
    }

    /// Accepted candidate saddle number `index` of the step in progress.
    ///
    /// Format: `s_{index}_saddle`. Shares its layout with worker results.
    pub fn candidate_saddle(&self, index: usize) -> String {
        self.stepped(format!("s_{}_saddle", index))
    }

    // Worker protocol

    /// Saddle configuration written by worker `id`.
    ///
    /// Format: `s_{id}_saddle`
    pub fn worker_saddle(&self, id: usize) -> String {
        format!("s_{}_saddle", id)
    }

    /// Two-line result record written by worker `id`.
    ///
    /// Format: `s_{id}_ev`
    pub fn worker_record(&self, id: usize) -> String {
        format!("s_{}_ev", id)
    }

    /// Dispatch flag of worker `id`.
    ///
    /// Format: `{id}.go`
    pub fn go_flag(&self, id: usize) -> String {
        format!("{}.go", id)
    }

    /// Completion flag of worker `id`.
    ///
    /// Format: `{id}.done`
    pub fn done_flag(&self, id: usize) -> String {
        format!("{}.done", id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_names() {
        let naming = FileNaming::new();
        assert_eq!(naming.minimum(0), "0");
        assert_eq!(naming.energy_record(12), "12_ev");
        assert_eq!(naming.forward_minimum(3), "3_saddle_A_minimum");
        assert_eq!(naming.reverse_minimum(3), "3_saddle_B_minimum");
        assert_eq!(naming.candidate_saddle(1), "s_1_saddle");
    }

    #[test]
    fn test_prefix_applies_to_step_outputs_only() {
        let naming = FileNaming::with_prefix("cu_adatom");
        assert_eq!(naming.minimum(5), "cu_adatom_5");
        assert_eq!(naming.step_saddle(5), "cu_adatom_5_saddle");
        assert_eq!(naming.worker_record(0), "s_0_ev");
        assert_eq!(naming.done_flag(0), "0.done");
    }

    #[test]
    fn test_blank_prefix_is_ignored() {
        let naming = FileNaming::with_prefix("  ");
        assert_eq!(naming.prefix(), None);
        assert_eq!(naming.minimum(2), "2");
    }
}
