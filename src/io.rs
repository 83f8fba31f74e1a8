//! Plain-text formats for configurations, energy records and the run log.
//!
//! Three formats are handled here:
//!
//! - **Positions** (`.pos`): one particle per line, `x y z` separated by whitespace.
//! - **Energy records**: two lines, the energy followed by the vibrational prefactor.
//!   Used for per-step minimum snapshots (`<step>_ev`) and worker results (`s_<id>_ev`).
//! - **tau-msd log**: append-only records of `-step <n>`, `tau: <t>`, `msd: <vector>`.

use crate::geometry::Configuration;
use nalgebra::Vector3;
use std::fs::{self, OpenOptions};
use std::io::{Result, Write};
use std::path::Path;

/// Energy and vibrational prefactor of a stationary point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyRecord {
    /// Potential energy
    pub energy: f64,
    /// Product of the normal-mode frequencies
    pub vibrational_prefactor: f64,
}

/// Formats a configuration in the positions format.
///
/// # Examples
///
/// ```
/// use okmc::geometry::Configuration;
/// use okmc::io;
///
/// let config = Configuration::from_flat(&[0.0, 0.5, 1.0, 2.0, 2.5, 3.0]);
/// let text = io::format_positions(&config);
/// assert_eq!(text.lines().count(), 2);
/// assert_eq!(io::parse_positions(&text).unwrap(), config);
/// ```
pub fn format_positions(config: &Configuration) -> String {
    let mut content = String::with_capacity(config.num_atoms() * 60);
    for i in 0..config.num_atoms() {
        let c = config.get_atom_coords(i);
        content.push_str(&format!("{:.17e} {:.17e} {:.17e}\n", c[0], c[1], c[2]));
    }
    content
}

/// Parses the positions format.
///
/// Blank lines are skipped. Every other line must contain exactly three numbers.
pub fn parse_positions(content: &str) -> std::result::Result<Configuration, String> {
    let mut positions = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let values: Vec<f64> = trimmed
            .split_whitespace()
            .map(|v| v.parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| format!("line {}: {}", lineno + 1, e))?;
        if values.len() != 3 {
            return Err(format!(
                "line {}: expected 3 coordinates, found {}",
                lineno + 1,
                values.len()
            ));
        }
        positions.push(Vector3::new(values[0], values[1], values[2]));
    }
    Ok(Configuration::new(positions))
}

/// Formats a two-line energy record.
pub fn format_energy_record(record: &EnergyRecord) -> String {
    format!("{}\n{}\n", record.energy, record.vibrational_prefactor)
}

/// Parses a two-line energy record.
///
/// Extra trailing lines are ignored; fewer than two non-empty lines is an error.
pub fn parse_energy_record(content: &str) -> std::result::Result<EnergyRecord, String> {
    let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());
    let energy_line = lines.next().ok_or("missing energy line")?;
    let prefactor_line = lines.next().ok_or("missing vibrational prefactor line")?;

    let energy = energy_line
        .parse::<f64>()
        .map_err(|e| format!("invalid energy '{}': {}", energy_line, e))?;
    let vibrational_prefactor = prefactor_line
        .parse::<f64>()
        .map_err(|e| format!("invalid vibrational prefactor '{}': {}", prefactor_line, e))?;

    Ok(EnergyRecord {
        energy,
        vibrational_prefactor,
    })
}

/// Formats one tau-msd log record.
pub fn format_tau_msd(step: usize, elapsed_time: f64, msd: &Vector3<f64>) -> String {
    format!(
        "-step {}\ntau: {}\nmsd: ({}, {}, {})\n",
        step, elapsed_time, msd.x, msd.y, msd.z
    )
}

/// Appends one record to the tau-msd log, creating the file if needed.
pub fn append_tau_msd(path: &Path, step: usize, elapsed_time: f64, msd: &Vector3<f64>) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(format_tau_msd(step, elapsed_time, msd).as_bytes())?;
    Ok(())
}

/// Creates an empty file, truncating any existing content.
pub fn touch(path: &Path) -> Result<()> {
    fs::write(path, b"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_positions_rejects_short_lines() {
        let err = parse_positions("0.0 1.0 2.0\n3.0 4.0\n").unwrap_err();
        assert!(err.contains("line 2"));
    }

    #[test]
    fn test_parse_positions_skips_blank_lines() {
        let config = parse_positions("\n1 2 3\n\n4 5 6\n").unwrap();
        assert_eq!(config.num_atoms(), 2);
        assert_eq!(config.get_atom_coords(0), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_energy_record_format() {
        let record = EnergyRecord {
            energy: -3.25,
            vibrational_prefactor: 1.0e13,
        };
        let text = format_energy_record(&record);
        assert_eq!(text.lines().count(), 2);
        assert_eq!(parse_energy_record(&text).unwrap(), record);
    }

    #[test]
    fn test_energy_record_missing_line() {
        let err = parse_energy_record("-3.25\n").unwrap_err();
        assert!(err.contains("prefactor"));
        assert!(parse_energy_record("abc\n1.0\n").is_err());
    }

    #[test]
    fn test_tau_msd_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tau-msd.dat");

        append_tau_msd(&path, 1, 0.5, &Vector3::new(0.1, 0.2, 0.3)).unwrap();
        append_tau_msd(&path, 2, 0.75, &Vector3::zeros()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "-step 1");
        assert_eq!(lines[1], "tau: 0.5");
        assert_eq!(lines[2], "msd: (0.1, 0.2, 0.3)");
        assert_eq!(lines[3], "-step 2");
    }
}
