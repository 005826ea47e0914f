// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training progress to a CSV file in the run directory,
// one row per epoch.
//
// Output file: {run_dir}/metrics.csv
//
// Example:
//   epoch,train_loss
//   1,3.124500
//   2,2.890100
//
// The loss here is the average per-batch loss the training
// driver observed during the epoch — the same value the
// checkpoint manager compares against its best-so-far.
//
// Reference: Rust Book §12 (I/O and File Handling)

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;

/// Appends epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create a logger in the given run directory.
    /// Writes the CSV header only when the file is new, so a resumed
    /// run appends to the existing log.
    pub fn new(run_dir: &Path) -> Result<Self> {
        fs::create_dir_all(run_dir)?;
        let csv_path = run_dir.join("metrics.csv");

        if !csv_path.exists() {
            let mut file = fs::File::create(&csv_path)?;
            writeln!(file, "epoch,train_loss")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's average training loss.
    pub fn log(&self, epoch: usize, train_loss: f64) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.csv_path)?;
        writeln!(file, "{},{:.6}", epoch, train_loss)?;
        tracing::debug!("Logged epoch {} metrics: train_loss={:.4}", epoch, train_loss);
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_and_rows() {
        let dir = std::env::temp_dir().join(format!("metrics-test-{}", std::process::id()));
        let logger = MetricsLogger::new(&dir).unwrap();
        logger.log(1, 3.1245).unwrap();
        logger.log(2, 2.8901).unwrap();

        let text = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "epoch,train_loss");
        assert!(lines[1].starts_with("1,3.1245"));
        assert_eq!(lines.len(), 3);

        fs::remove_dir_all(&dir).ok();
    }
}
