// ============================================================
// Layer 4 — Batch Generator
// ============================================================
// Exposes the precomputed batch list to the training driver as
// a pull-based sequence, in one of two modes:
//
//   SinglePass → every batch once, in order, then exhaustion.
//                Weights stay in the row layout the weighting
//                pass produced.
//   Cycling    → round-robin forever, restarting at index 0
//                after the last batch. Used by the training
//                driver, which consumes steps_per_epoch items
//                per epoch while epochs usually exceed the
//                number of physical batches. In this mode the
//                weights element of each yielded triple is
//                converted to one array per target column —
//                the layout the driver feeds into the model.
//
// Both modes live on one component behind an explicit flag, so
// the contract stays testable without a training driver on the
// other end.
//
// Reference: Rust Book §13 (Iterators)

use ndarray::{Array1, ArrayD};

use crate::data::batcher::Batch;

/// How the generator traverses the batch list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorMode {
    /// Yield each batch once, then stop
    SinglePass,
    /// Yield batches round-robin, indefinitely
    Cycling,
}

/// The weights element of a yielded triple, in whichever layout
/// the selected mode produces.
#[derive(Debug, Clone)]
pub enum WeightColumns {
    /// Row layout straight from the weighting pass
    Rows(Vec<Vec<f32>>),
    /// Per-column arrays, as the training driver consumes them
    Arrays(Vec<Array1<f32>>),
}

impl WeightColumns {
    /// Collapse to the per-column array layout, converting if needed.
    pub fn into_arrays(self) -> Vec<Array1<f32>> {
        match self {
            WeightColumns::Arrays(columns) => columns,
            WeightColumns::Rows(rows) => rows.into_iter().map(Array1::from).collect(),
        }
    }
}

/// One yielded training triple.
#[derive(Debug, Clone)]
pub struct TrainStep {
    pub features: Vec<ArrayD<f32>>,
    pub targets: Vec<ArrayD<f32>>,
    pub weights: WeightColumns,
}

/// Pull-based sequence over an immutable batch list.
#[derive(Debug)]
pub struct BatchGenerator {
    batches: Vec<Batch>,
    mode: GeneratorMode,
    next: usize,
}

impl BatchGenerator {
    pub fn new(batches: Vec<Batch>, mode: GeneratorMode) -> Self {
        Self { batches, mode, next: 0 }
    }

    /// Number of physical batches — the training driver's steps per epoch.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

impl Iterator for BatchGenerator {
    type Item = TrainStep;

    fn next(&mut self) -> Option<TrainStep> {
        if self.batches.is_empty() {
            return None;
        }
        match self.mode {
            GeneratorMode::SinglePass => {
                let batch = self.batches.get(self.next)?;
                self.next += 1;
                Some(TrainStep {
                    features: batch.features.clone(),
                    targets: batch.targets.clone(),
                    weights: WeightColumns::Rows(batch.weights.clone()),
                })
            }
            GeneratorMode::Cycling => {
                let batch = &self.batches[self.next];
                self.next = (self.next + 1) % self.batches.len();
                Some(TrainStep {
                    features: batch.features.clone(),
                    targets: batch.targets.clone(),
                    weights: WeightColumns::Arrays(
                        batch.weights.iter().cloned().map(Array1::from).collect(),
                    ),
                })
            }
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn batch_with_rows(rows: usize) -> Batch {
        Batch {
            features: vec![ArrayD::zeros(IxDyn(&[rows, 2]))],
            targets: vec![ArrayD::zeros(IxDyn(&[rows, 2, 3]))],
            weights: vec![vec![1.0; rows]],
            rows,
        }
    }

    #[test]
    fn test_single_pass_terminates_after_last_batch() {
        let mut generator = BatchGenerator::new(
            vec![batch_with_rows(1), batch_with_rows(2), batch_with_rows(3)],
            GeneratorMode::SinglePass,
        );
        let rows: Vec<usize> = (&mut generator).map(|s| s.features[0].shape()[0]).collect();
        assert_eq!(rows, vec![1, 2, 3]);
        assert!(generator.next().is_none());
    }

    #[test]
    fn test_single_pass_keeps_row_layout() {
        let mut generator =
            BatchGenerator::new(vec![batch_with_rows(2)], GeneratorMode::SinglePass);
        let step = generator.next().unwrap();
        assert!(matches!(step.weights, WeightColumns::Rows(_)));
    }

    #[test]
    fn test_cycling_restarts_at_zero() {
        let mut generator = BatchGenerator::new(
            vec![batch_with_rows(1), batch_with_rows(2)],
            GeneratorMode::Cycling,
        );
        let rows: Vec<usize> = (0..5)
            .map(|_| generator.next().unwrap().features[0].shape()[0])
            .collect();
        assert_eq!(rows, vec![1, 2, 1, 2, 1]);
    }

    #[test]
    fn test_cycling_converts_weights_to_arrays() {
        let mut generator = BatchGenerator::new(vec![batch_with_rows(2)], GeneratorMode::Cycling);
        let step = generator.next().unwrap();
        match &step.weights {
            WeightColumns::Arrays(columns) => {
                assert_eq!(columns.len(), 1);
                assert_eq!(columns[0].len(), 2);
            }
            other => panic!("expected array layout, got {:?}", other),
        }
        // into_arrays is a no-op on the already-converted layout
        assert_eq!(step.weights.into_arrays().len(), 1);
    }

    #[test]
    fn test_empty_generator_is_exhausted_in_both_modes() {
        assert!(BatchGenerator::new(Vec::new(), GeneratorMode::SinglePass).next().is_none());
        assert!(BatchGenerator::new(Vec::new(), GeneratorMode::Cycling).next().is_none());
    }
}
