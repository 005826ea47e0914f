// ============================================================
// Layer 4 — Length-Bucketed Batching Engine
// ============================================================
// Partitions a length-sorted tree sequence into batches bounded
// by a WORD budget (total token count), not a row count, then
// pads and encodes each batch independently.
//
// How batching works here:
//   1. partition_by_word_budget walks the sorted trees once and
//      produces boundary ranges. A batch closes when admitting
//      the next tree would push the running word count over the
//      budget; the remainder always becomes a final batch, so no
//      tree is ever dropped.
//   2. The feature, target, and weight passes all slice against
//      those SAME ranges. Computing the partition once is what
//      guarantees the three passes stay row-aligned — there are
//      no separately-maintained counters to drift apart.
//   3. Each column of a batch is zero-padded (post-padding) to
//      that column's own maximum length within the batch. Trees
//      arrive pre-sorted by length, so neighbouring trees have
//      similar lengths and the padding overhead stays small.
//
// Target encoding dispatch (by target name):
//   head         → one-hot, class count = the column's padded
//                  length (head indices are batch-local positions)
//   feats, sent  → pass through (already multi-hot / continuous)
//   anything else→ one-hot, class count = the target's vocabulary
//
// Reference: other production batchers pad the same way —
//            max-length scan then right-fill (see any sequence
//            collator); ndarray crate documentation

use std::ops::Range;

use anyhow::{bail, ensure, Result};
use ndarray::{ArrayD, Dimension, IxDyn};

use crate::data::encoders::{FeatureEncoders, TargetEncoders};
use crate::data::weights::WeightingPolicy;
use crate::domain::tree::Tree;

// ─── Batch ────────────────────────────────────────────────────────────────────
/// One batch: padded feature columns, encoded target columns, and
/// weight columns, all sharing the same row order and row count.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Padded feature columns, one per configured feature
    pub features: Vec<ArrayD<f32>>,
    /// Padded, dispatch-encoded target columns, one per configured target
    pub targets: Vec<ArrayD<f32>>,
    /// Per-target weight columns, one scalar per row
    pub weights: Vec<Vec<f32>>,
    /// Number of trees in this batch
    pub rows: usize,
}

// ─── Partition ────────────────────────────────────────────────────────────────
/// Split the sorted tree sequence into contiguous index ranges, each
/// holding at most `batch_size` words — except that a single tree
/// larger than the whole budget still gets a (one-row) range of its own.
///
/// All three batching passes must slice against the ranges returned
/// here; they are the single source of truth for batch boundaries.
pub fn partition_by_word_budget(trees: &[&Tree], batch_size: usize) -> Vec<Range<usize>> {
    let mut bounds = Vec::new();
    let mut start = 0;
    let mut words = 0;

    for (index, tree) in trees.iter().enumerate() {
        let count = tree.token_count();
        if words + count > batch_size && index > start {
            bounds.push(start..index);
            start = index;
            words = 0;
        }
        words += count;
    }
    if start < trees.len() {
        bounds.push(start..trees.len());
    }
    bounds
}

// ─── Padding ──────────────────────────────────────────────────────────────────
/// Stack one column's cells into a single array, zero-padding every
/// axis to the column's maximum. Axis 0 of each cell is the (rooted)
/// token axis, so the padded shape's second dimension is the batch's
/// sequence length.
pub fn pad_column(cells: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
    ensure!(!cells.is_empty(), "cannot pad an empty column");
    let rank = cells[0].ndim();
    for cell in cells {
        ensure!(
            cell.ndim() == rank,
            "column mixes cell ranks {} and {}",
            rank,
            cell.ndim(),
        );
    }

    let mut shape = vec![cells.len()];
    for axis in 0..rank {
        shape.push(cells.iter().map(|c| c.shape()[axis]).max().unwrap_or(0));
    }

    let mut padded = ArrayD::<f32>::zeros(IxDyn(&shape));
    for (row, cell) in cells.iter().enumerate() {
        for (index, &value) in cell.indexed_iter() {
            let mut full = Vec::with_capacity(rank + 1);
            full.push(row);
            full.extend_from_slice(index.slice());
            padded[IxDyn(&full)] = value;
        }
    }
    Ok(padded)
}

/// One-hot encode a padded `[rows, length]` index column into
/// `[rows, length, classes]`. Padding zeros become class 0, which the
/// decoders treat as `<pad>` and never read back.
pub fn one_hot(column: &ArrayD<f32>, classes: usize) -> Result<ArrayD<f32>> {
    ensure!(
        column.ndim() == 2,
        "one-hot expects a [rows, length] column, got rank {}",
        column.ndim(),
    );
    let rows = column.shape()[0];
    let length = column.shape()[1];

    let mut encoded = ArrayD::<f32>::zeros(IxDyn(&[rows, length, classes]));
    for (index, &value) in column.indexed_iter() {
        let class = value.round() as usize;
        ensure!(
            class < classes,
            "class index {} out of range for {} classes",
            class,
            classes,
        );
        encoded[IxDyn(&[index[0], index[1], class])] = 1.0;
    }
    Ok(encoded)
}

// ─── Batching passes ──────────────────────────────────────────────────────────
/// Build the padded feature columns for every batch:
/// `result[batch][column]`.
pub fn batchify_features(
    trees: &[&Tree],
    encoders: &FeatureEncoders,
    bounds: &[Range<usize>],
) -> Result<Vec<Vec<ArrayD<f32>>>> {
    let raw = encoders.transform(trees)?;
    let mut batches = Vec::with_capacity(bounds.len());
    for bound in bounds {
        let mut columns = Vec::with_capacity(raw.len());
        for cells in &raw {
            columns.push(pad_column(&cells[bound.clone()])?);
        }
        batches.push(columns);
    }
    Ok(batches)
}

/// Build the padded, dispatch-encoded target columns for every batch:
/// `result[batch][column]`.
pub fn batchify_targets(
    trees: &[&Tree],
    encoders: &TargetEncoders,
    bounds: &[Range<usize>],
) -> Result<Vec<Vec<ArrayD<f32>>>> {
    let raw = encoders.transform(trees)?;
    let mut batches = Vec::with_capacity(bounds.len());
    for bound in bounds {
        let mut columns = Vec::with_capacity(raw.len());
        for (name, cells) in encoders.names().iter().zip(&raw) {
            let padded = pad_column(&cells[bound.clone()])?;
            let encoded = match name.as_str() {
                // Head targets reference in-sentence positions: the class
                // space is this batch's own padded length, not a vocabulary.
                "head" => {
                    let length = padded.shape()[1];
                    one_hot(&padded, length)?
                }
                // Continuous / pre-encoded targets pass through unmodified.
                "feats" | "sent" => padded,
                _ => one_hot(&padded, encoders.vocab_size(name)?)?,
            };
            columns.push(encoded);
        }
        batches.push(columns);
    }
    Ok(batches)
}

/// Build the per-target weight columns for every batch:
/// `result[batch][column][row]`.
pub fn batchify_weights(
    trees: &[&Tree],
    policy: &WeightingPolicy,
    targets: &[String],
    bounds: &[Range<usize>],
) -> Vec<Vec<Vec<f32>>> {
    let mut batches = Vec::with_capacity(bounds.len());
    for bound in bounds {
        let mut columns = vec![Vec::with_capacity(bound.len()); targets.len()];
        for tree in &trees[bound.clone()] {
            for (column, weight) in columns.iter_mut().zip(policy.tree_weights(tree, targets)) {
                column.push(weight);
            }
        }
        batches.push(columns);
    }
    batches
}

// ─── Zip ──────────────────────────────────────────────────────────────────────
/// Zip the three aligned passes into `Batch` values, verifying that
/// every column of every batch agrees on the row count. A mismatch
/// here is a broken invariant, not a recoverable condition.
pub fn zip_batches(
    features: Vec<Vec<ArrayD<f32>>>,
    targets: Vec<Vec<ArrayD<f32>>>,
    weights: Vec<Vec<Vec<f32>>>,
) -> Result<Vec<Batch>> {
    ensure!(
        features.len() == targets.len() && targets.len() == weights.len(),
        "batch count mismatch across passes: {} features, {} targets, {} weights",
        features.len(),
        targets.len(),
        weights.len(),
    );

    let mut batches = Vec::with_capacity(features.len());
    for (index, ((features, targets), weights)) in
        features.into_iter().zip(targets).zip(weights).enumerate()
    {
        let rows = match features.first() {
            Some(column) => column.shape()[0],
            None => bail!("batch {} has no feature columns", index),
        };
        for column in features.iter().chain(&targets) {
            ensure!(
                column.shape()[0] == rows,
                "batch {}: column with {} rows next to {}",
                index,
                column.shape()[0],
                rows,
            );
        }
        for column in &weights {
            ensure!(
                column.len() == rows,
                "batch {}: weight column with {} rows next to {}",
                index,
                column.len(),
                rows,
            );
        }
        batches.push(Batch { features, targets, weights, rows });
    }
    Ok(batches)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tree::Token;
    use ndarray::{Array1, Array2, IxDyn};

    fn tree_of(id: usize, token_count: usize) -> Tree {
        let tokens = (1..=token_count)
            .map(|i| Token {
                id: i.to_string(),
                form: format!("w{}", i),
                head: ((i + 1) % (token_count + 1)).to_string(),
                deprel: "dep".to_string(),
                ..Token::default()
            })
            .collect();
        let words = (1..=token_count).map(|i| format!("w{}", i)).collect();
        Tree::new(id, tokens, words, Vec::new())
    }

    fn sorted_refs(trees: &[Tree]) -> Vec<&Tree> {
        let mut refs: Vec<&Tree> = trees.iter().collect();
        refs.sort_by_key(|t| t.token_count());
        refs
    }

    #[test]
    fn test_partition_worked_example() {
        // Lengths [2, 10, 3] with a budget of 8: sorted order is [2, 3, 10];
        // 2 then 2+3=5 fit, adding 10 would overflow, so the first batch
        // closes with two trees and the remainder forms a second batch.
        let trees = vec![tree_of(0, 2), tree_of(1, 10), tree_of(2, 3)];
        let refs = sorted_refs(&trees);
        let bounds = partition_by_word_budget(&refs, 8);
        assert_eq!(bounds, vec![0..2, 2..3]);
    }

    #[test]
    fn test_partition_conserves_rows() {
        let trees: Vec<Tree> = (0..13).map(|i| tree_of(i, 1 + i % 5)).collect();
        let refs = sorted_refs(&trees);
        let bounds = partition_by_word_budget(&refs, 6);
        let total: usize = bounds.iter().map(|b| b.len()).sum();
        assert_eq!(total, trees.len());
    }

    #[test]
    fn test_oversized_tree_forms_own_batch() {
        let trees = vec![tree_of(0, 20), tree_of(1, 2)];
        let refs = sorted_refs(&trees); // [2, 20]
        let bounds = partition_by_word_budget(&refs, 8);
        assert_eq!(bounds, vec![0..1, 1..2]);
    }

    #[test]
    fn test_empty_input_yields_zero_batches() {
        let bounds = partition_by_word_budget(&[], 8);
        assert!(bounds.is_empty());
    }

    #[test]
    fn test_pad_column_is_post_padding() {
        let cells = vec![
            Array1::from(vec![1.0f32, 2.0]).into_dyn(),
            Array1::from(vec![3.0f32, 4.0, 5.0]).into_dyn(),
        ];
        let padded = pad_column(&cells).unwrap();
        assert_eq!(padded.shape(), &[2, 3]);
        // Short row is right-padded with zeros
        assert_eq!(padded[IxDyn(&[0, 2])], 0.0);
        assert_eq!(padded[IxDyn(&[1, 2])], 5.0);
    }

    #[test]
    fn test_pad_column_pads_trailing_axes_too() {
        let cells = vec![
            Array2::<f32>::ones((2, 2)).into_dyn(),
            Array2::<f32>::ones((3, 4)).into_dyn(),
        ];
        let padded = pad_column(&cells).unwrap();
        assert_eq!(padded.shape(), &[2, 3, 4]);
        assert_eq!(padded[IxDyn(&[0, 1, 1])], 1.0);
        assert_eq!(padded[IxDyn(&[0, 2, 3])], 0.0);
    }

    #[test]
    fn test_one_hot_shape_and_placement() {
        let column = pad_column(&[
            Array1::from(vec![0.0f32, 2.0]).into_dyn(),
            Array1::from(vec![1.0f32]).into_dyn(),
        ])
        .unwrap();
        let encoded = one_hot(&column, 3).unwrap();
        assert_eq!(encoded.shape(), &[2, 2, 3]);
        assert_eq!(encoded[IxDyn(&[0, 1, 2])], 1.0);
        // Padded position encodes as class 0
        assert_eq!(encoded[IxDyn(&[1, 1, 0])], 1.0);
    }

    #[test]
    fn test_head_one_hot_width_is_batch_local() {
        // Two batches with different padded lengths: the head one-hot
        // class count must follow each batch's own padded length.
        let trees = vec![tree_of(0, 2), tree_of(1, 3), tree_of(2, 9)];
        let refs = sorted_refs(&trees);
        let bounds = partition_by_word_budget(&refs, 5);
        assert_eq!(bounds.len(), 2);

        let mut encoders = TargetEncoders::new(&["head".to_string()]).unwrap();
        encoders.fit(&refs).unwrap();
        let batches = batchify_targets(&refs, &encoders, &bounds).unwrap();

        // First batch: longest tree has 3 tokens → rooted length 4
        assert_eq!(batches[0][0].shape(), &[2, 4, 4]);
        // Second batch: 9 tokens → rooted length 10
        assert_eq!(batches[1][0].shape(), &[1, 10, 10]);
    }

    #[test]
    fn test_three_passes_share_boundaries() {
        let trees: Vec<Tree> = (0..10).map(|i| tree_of(i, 1 + i % 4)).collect();
        let refs = sorted_refs(&trees);
        let bounds = partition_by_word_budget(&refs, 5);

        let mut features = FeatureEncoders::new(&["form".to_string()]).unwrap();
        features.fit(&refs).unwrap();
        let mut targets = TargetEncoders::new(&["deprel".to_string()]).unwrap();
        targets.fit(&refs).unwrap();
        let policy = WeightingPolicy {
            train_partial: false,
            full_tree_marker: "# full_tree".to_string(),
            partial_tree_marker: "# partial_tree".to_string(),
            mask_weight: 1e-9,
        };

        let x = batchify_features(&refs, &features, &bounds).unwrap();
        let y = batchify_targets(&refs, &targets, &bounds).unwrap();
        let w = batchify_weights(&refs, &policy, &["deprel".to_string()], &bounds);

        let batches = zip_batches(x, y, w).unwrap();
        let total: usize = batches.iter().map(|b| b.rows).sum();
        assert_eq!(total, trees.len());
        for (batch, bound) in batches.iter().zip(&bounds) {
            assert_eq!(batch.rows, bound.len());
        }
    }

    #[test]
    fn test_feats_column_passes_through_unencoded() {
        let mut tree = tree_of(0, 2);
        tree.tokens[0].feats = "Number=Sing".to_string();
        let trees = vec![tree];
        let refs = sorted_refs(&trees);
        let bounds = partition_by_word_budget(&refs, 100);

        let mut encoders = TargetEncoders::new(&["feats".to_string()]).unwrap();
        encoders.fit(&refs).unwrap();
        let batches = batchify_targets(&refs, &encoders, &bounds).unwrap();

        // Multi-hot stays rank 3 with the feats vocabulary as last axis,
        // untouched by any one-hot step.
        let vocab = encoders.vocab_size("feats").unwrap();
        assert_eq!(batches[0][0].shape(), &[1, 3, vocab]);
    }
}
