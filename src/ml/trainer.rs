// ============================================================
// Layer 5 — Training Driver
// ============================================================
// Drives the epoch loop over the cycling batch generator.
//
// One "step" is one batch fed to the model; one epoch is
// steps_per_epoch steps. The orchestrator sets steps_per_epoch
// to the number of physical batches, so every epoch sees every
// batch exactly once even though the generator itself never
// terminates.
//
// Per epoch:
//   - average the per-batch losses
//   - append a row to metrics.csv
//   - hand the model to the checkpoint manager, which snapshots
//     it only on improvement
//
// The model is opaque here: anything implementing ParserModel
// can be driven by this loop.
//
// Reference: Rust Book §13 (Iterators and Closures)

use anyhow::{Context, Result};

use crate::data::generator::BatchGenerator;
use crate::infra::checkpoint::RunArtifacts;
use crate::infra::metrics::MetricsLogger;
use crate::ml::model::ParserModel;

/// Run the full training loop: `epochs` epochs of `steps_per_epoch`
/// batches each, pulled from `generator`.
pub fn run_training(
    model: &mut dyn ParserModel,
    generator: &mut BatchGenerator,
    steps_per_epoch: usize,
    epochs: usize,
    artifacts: &mut RunArtifacts,
) -> Result<()> {
    if steps_per_epoch == 0 {
        // An empty treebank produces zero batches — a legitimate no-op
        tracing::warn!("No batches to train on — skipping training loop");
        return Ok(());
    }

    let logger = MetricsLogger::new(artifacts.dir())?;
    tracing::info!("Training: {} epochs × {} steps", epochs, steps_per_epoch);

    for epoch in 1..=epochs {
        let mut loss_sum = 0.0f64;

        for _ in 0..steps_per_epoch {
            let step = generator
                .next()
                .context("batch generator exhausted mid-epoch")?;
            let weights = step.weights.into_arrays();
            loss_sum += model.train_on_batch(&step.features, &step.targets, &weights)?;
        }

        let avg_loss = loss_sum / steps_per_epoch as f64;
        logger.log(epoch, avg_loss)?;
        let saved = artifacts.save_weights(model, epoch, avg_loss)?;

        tracing::info!(
            "Epoch {:>3}/{} | loss={:.4}{}",
            epoch,
            epochs,
            avg_loss,
            if saved { " | snapshot saved" } else { "" },
        );
    }

    tracing::info!("Training complete");
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::Batch;
    use crate::data::generator::GeneratorMode;
    use crate::ml::model::ModelOutput;
    use ndarray::{Array1, ArrayD, IxDyn};
    use std::path::Path;

    /// Counts the batches it is fed; loss decreases by one per call.
    struct CountingModel {
        calls: usize,
    }

    impl ParserModel for CountingModel {
        fn train_on_batch(
            &mut self,
            _features: &[ArrayD<f32>],
            _targets: &[ArrayD<f32>],
            _weights: &[Array1<f32>],
        ) -> Result<f64> {
            self.calls += 1;
            Ok(100.0 - self.calls as f64)
        }

        fn predict_on_batch(&self, _features: &[ArrayD<f32>]) -> Result<ModelOutput> {
            Ok(ModelOutput::Columns(Vec::new()))
        }

        fn save(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn batch() -> Batch {
        Batch {
            features: vec![ArrayD::zeros(IxDyn(&[1, 2]))],
            targets: vec![ArrayD::zeros(IxDyn(&[1, 2, 2]))],
            weights: vec![vec![1.0]],
            rows: 1,
        }
    }

    fn temp_run_dir(tag: &str) -> String {
        std::env::temp_dir()
            .join(format!("trainer-test-{}-{}", tag, std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_one_step_per_batch_per_epoch() {
        let root = temp_run_dir("steps");
        let mut artifacts = RunArtifacts::create(&root).unwrap();
        let mut model = CountingModel { calls: 0 };
        let mut generator =
            BatchGenerator::new(vec![batch(), batch(), batch()], GeneratorMode::Cycling);

        run_training(&mut model, &mut generator, 3, 4, &mut artifacts).unwrap();
        assert_eq!(model.calls, 12);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_zero_batches_is_a_noop() {
        let root = temp_run_dir("noop");
        let mut artifacts = RunArtifacts::create(&root).unwrap();
        let mut model = CountingModel { calls: 0 };
        let mut generator = BatchGenerator::new(Vec::new(), GeneratorMode::Cycling);

        run_training(&mut model, &mut generator, 0, 5, &mut artifacts).unwrap();
        assert_eq!(model.calls, 0);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_metrics_csv_has_one_row_per_epoch() {
        let root = temp_run_dir("metrics");
        let mut artifacts = RunArtifacts::create(&root).unwrap();
        let run_dir = artifacts.dir().to_path_buf();
        let mut model = CountingModel { calls: 0 };
        let mut generator = BatchGenerator::new(vec![batch()], GeneratorMode::Cycling);

        run_training(&mut model, &mut generator, 1, 3, &mut artifacts).unwrap();

        let text = std::fs::read_to_string(run_dir.join("metrics.csv")).unwrap();
        assert_eq!(text.lines().count(), 4); // header + 3 epochs

        std::fs::remove_dir_all(&root).ok();
    }
}
