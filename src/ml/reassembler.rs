// ============================================================
// Layer 5 — Prediction Reassembler
// ============================================================
// Turns one batch of decoded model outputs back into trees.
//
// Rules:
//   - NEVER mutate an input tree or token. Every output token
//     is a field-for-field copy of the original with only the
//     predicted target fields overwritten.
//   - Fields that are not configured targets pass through from
//     the original token untouched.
//   - The `sent` target is not a token field: its prediction is
//     captured as the tree's sentence-level embedding.
//   - When configured, the raw per-target probability rows are
//     attached to the output tree for downstream consumers.
//
// The reassembler works batch-by-batch; restoring the caller's
// tree ordering (by identifier) is the orchestrator's final step.
//
// Reference: Rust Book §4 (Ownership), §8 (Collections)

use anyhow::{ensure, Result};
use ndarray::{ArrayD, Axis};

use crate::data::encoders::TreePrediction;
use crate::domain::tree::Tree;

/// Rebuild one batch's trees with predicted annotations.
///
/// `predictions[column][row]` are the decoded values for the target
/// at `targets[column]`; `probs` are the raw output columns, sliced
/// per row when probability retention is on.
pub fn reassemble_batch(
    trees: &[&Tree],
    probs: &[ArrayD<f32>],
    predictions: &[Vec<TreePrediction>],
    targets: &[String],
    save_probs: bool,
) -> Result<Vec<Tree>> {
    ensure!(
        predictions.len() == targets.len(),
        "{} prediction columns for {} targets",
        predictions.len(),
        targets.len(),
    );
    for (target, column) in targets.iter().zip(predictions) {
        ensure!(
            column.len() == trees.len(),
            "target '{}' has {} prediction rows for {} trees",
            target,
            column.len(),
            trees.len(),
        );
    }

    let mut output = Vec::with_capacity(trees.len());
    for (row, old_tree) in trees.iter().enumerate() {
        // Copy-on-write: predictions land on clones, the input stays intact
        let mut tokens = old_tree.tokens.clone();
        let mut emb = None;

        for (target, column) in targets.iter().zip(predictions) {
            match &column[row] {
                TreePrediction::SentenceEmbedding(vector) => {
                    emb = Some(vector.clone());
                }
                TreePrediction::TokenFields(values) => {
                    ensure!(
                        values.len() == tokens.len(),
                        "target '{}' predicted {} values for a {}-token tree",
                        target,
                        values.len(),
                        tokens.len(),
                    );
                    for (token, value) in tokens.iter_mut().zip(values) {
                        token.set_field(target, value.clone())?;
                    }
                }
            }
        }

        let row_probs = save_probs
            .then(|| probs.iter().map(|p| p.index_axis(Axis(0), row).to_owned()).collect());

        output.push(Tree {
            id: old_tree.id,
            tokens,
            words: old_tree.words.clone(),
            comments: old_tree.comments.clone(),
            probs: row_probs,
            emb,
        });
    }
    Ok(output)
}
