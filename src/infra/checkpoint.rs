// ============================================================
// Layer 6 — Run Artifacts / Checkpoint Manager
// ============================================================
// Owns the per-run output directory and the weight snapshots
// written during training.
//
// Directory naming contract:
//   {output_root}/{run_id}/
// where run_id is a UTC timestamp, YYYYMMDDThhmmss — one run,
// one directory, sortable by name.
//
// What gets written per run:
//   weights.epoch{EE}-loss{L.LL}.json  ← model snapshot, saved
//                                        only when the loss
//                                        improves on the best
//                                        seen so far
//   latest_weights.json                ← name of the newest
//                                        snapshot, so loading
//                                        never has to parse
//                                        filenames
//   metrics.csv                        ← written by MetricsLogger
//   parser.json                        ← written by the parser
//                                        (config + encoders)
//
// The timestamp is computed from SystemTime with a civil-date
// conversion — no time crate needed for one fixed format.
//
// Reference: Rust Book §9 (Error Handling)
//            Howard Hinnant, "chrono-Compatible Low-Level Date
//            Algorithms" (civil_from_days)

use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};

use crate::ml::model::ParserModel;

/// Manages one training run's output directory and snapshots.
pub struct RunArtifacts {
    dir: PathBuf,
    best_loss: f64,
}

impl RunArtifacts {
    /// Create `{output_root}/{run_id}/` and point this manager at it.
    pub fn create(output_root: &str) -> Result<Self> {
        let dir = Path::new(output_root).join(run_id());
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create run directory '{}'", dir.display()))?;
        tracing::info!("Run directory: '{}'", dir.display());
        Ok(Self { dir, best_loss: f64::INFINITY })
    }

    /// The run directory, for collaborators that write next to the snapshots.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save a snapshot if `loss` beats the best seen so far.
    /// Returns whether a snapshot was written.
    pub fn save_weights(
        &mut self,
        model: &dyn ParserModel,
        epoch: usize,
        loss: f64,
    ) -> Result<bool> {
        if loss >= self.best_loss {
            tracing::debug!(
                "Epoch {}: loss {:.4} did not improve on {:.4} — no snapshot",
                epoch,
                loss,
                self.best_loss,
            );
            return Ok(false);
        }
        self.best_loss = loss;

        let name = format!("weights.epoch{:02}-loss{:.2}.json", epoch, loss);
        model.save(&self.dir.join(&name))?;

        // Update the pointer so loading never has to parse filenames
        let pointer = self.dir.join("latest_weights.json");
        fs::write(&pointer, serde_json::to_string(&name)?)
            .with_context(|| "Failed to write latest_weights.json")?;

        tracing::info!("Saved snapshot '{}'", name);
        Ok(true)
    }

    /// Resolve the newest snapshot in a run directory.
    pub fn latest_weights(dir: &Path) -> Result<PathBuf> {
        let pointer = dir.join("latest_weights.json");
        let name: String = serde_json::from_str(
            &fs::read_to_string(&pointer).with_context(|| {
                format!(
                    "Cannot read '{}'. Has a model been trained in this directory?",
                    pointer.display(),
                )
            })?,
        )?;
        Ok(dir.join(name))
    }
}

/// UTC timestamp in the run-id format, e.g. `20260806T142501`.
pub fn run_id() -> String {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_utc(seconds)
}

/// Render epoch seconds as `YYYYMMDDThhmmss` in UTC.
fn format_utc(seconds: u64) -> String {
    let days = (seconds / 86_400) as i64;
    let rem = seconds % 86_400;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}",
        year,
        month,
        day,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60,
    )
}

/// Days since 1970-01-01 → (year, month, day), proleptic Gregorian.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if month <= 2 { year + 1 } else { year }, month, day)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_zero_formats_correctly() {
        assert_eq!(format_utc(0), "19700101T000000");
    }

    #[test]
    fn test_known_timestamp() {
        // 2020-02-29 12:34:56 UTC
        assert_eq!(format_utc(1_582_979_696), "20200229T123456");
    }

    #[test]
    fn test_run_id_shape() {
        let id = run_id();
        assert_eq!(id.len(), 15);
        assert_eq!(id.as_bytes()[8], b'T');
        assert!(id.chars().filter(|c| *c != 'T').all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_snapshot_name_contains_epoch_and_loss() {
        let name = format!("weights.epoch{:02}-loss{:.2}.json", 3, 1.25f64);
        assert_eq!(name, "weights.epoch03-loss1.25.json");
    }
}
