// ============================================================
// Layer 4 — Sample Weighting Policy
// ============================================================
// Computes the per-tree, per-target scalar weights that scale
// each target's loss contribution.
//
// Base weight: ln(token count). Longer sentences carry more
// training signal, damped logarithmically so sentence length
// never dominates the loss.
//
// Supervision tiers, selected from the tree's comment markers:
//   full marker (or partial training disabled)
//       → all syntactic + morphological targets get the base weight
//   partial marker
//       → only morphological targets get the base weight
//   no recognised marker
//       → nothing does
// Every remaining target gets the mask weight: a small nonzero
// value rather than exact zero, so masked columns keep the loss
// and metric arithmetic finite while contributing nothing.
// The mask weight is a policy parameter, configurable next to
// the marker strings.
//
// `sent` is never in a supervision tier — a sentence embedding
// is not an annotation a human supplies — so its column is
// always masked.

use serde::{Deserialize, Serialize};

use crate::domain::tree::Tree;

/// Targets supervised by a fully annotated tree.
pub const FULL_SUPERVISION_TARGETS: [&str; 7] =
    ["head", "deprel", "lemma", "upostag", "xpostag", "feats", "semrel"];

/// Targets supervised by a partially annotated tree (morphology only).
pub const MORPHOLOGY_TARGETS: [&str; 4] = ["lemma", "upostag", "xpostag", "feats"];

/// Decides, per tree, which targets carry real training signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightingPolicy {
    /// Whether partially annotated trees participate at all.
    /// When false, every tree is treated as fully annotated.
    pub train_partial: bool,
    /// Comment line marking a fully annotated tree
    pub full_tree_marker: String,
    /// Comment line marking a partially annotated tree
    pub partial_tree_marker: String,
    /// Weight assigned to unsupervised targets — near-zero, never zero
    pub mask_weight: f32,
}

impl WeightingPolicy {
    /// One weight per configured target, in target order.
    pub fn tree_weights(&self, tree: &Tree, targets: &[String]) -> Vec<f32> {
        let base = (tree.token_count() as f32).ln();
        let supervised = self.supervised_targets(tree);
        targets
            .iter()
            .map(|target| {
                if supervised.contains(&target.as_str()) {
                    base
                } else {
                    self.mask_weight
                }
            })
            .collect()
    }

    /// The supervision tier the tree falls into.
    fn supervised_targets(&self, tree: &Tree) -> &'static [&'static str] {
        if !self.train_partial || tree.has_comment(&self.full_tree_marker) {
            &FULL_SUPERVISION_TARGETS
        } else if tree.has_comment(&self.partial_tree_marker) {
            &MORPHOLOGY_TARGETS
        } else {
            &[]
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tree::Token;

    const MASK: f32 = 1e-9;

    fn policy() -> WeightingPolicy {
        WeightingPolicy {
            train_partial: true,
            full_tree_marker: "# full_tree".to_string(),
            partial_tree_marker: "# partial_tree".to_string(),
            mask_weight: MASK,
        }
    }

    fn tree_of(token_count: usize, comments: &[&str]) -> Tree {
        let tokens = (0..token_count).map(|_| Token::default()).collect();
        let words = (0..token_count).map(|_| "_".to_string()).collect();
        Tree::new(0, tokens, words, comments.iter().map(|c| c.to_string()).collect())
    }

    fn all_targets() -> Vec<String> {
        ["head", "deprel", "lemma", "upostag", "xpostag", "feats", "semrel", "sent"]
            .iter()
            .map(|t| t.to_string())
            .collect()
    }

    #[test]
    fn test_full_tree_weights_all_supervised_targets() {
        let weights = policy().tree_weights(&tree_of(5, &["# full_tree"]), &all_targets());
        let base = 5.0f32.ln();
        // head..semrel get ln(5); sent stays masked
        for (index, weight) in weights.iter().enumerate().take(7) {
            assert!((weight - base).abs() < 1e-6, "target {} got {}", index, weight);
        }
        assert_eq!(weights[7], MASK);
    }

    #[test]
    fn test_partial_tree_weights_morphology_only() {
        let weights = policy().tree_weights(&tree_of(5, &["# partial_tree"]), &all_targets());
        let base = 5.0f32.ln();
        let expect_base = ["lemma", "upostag", "xpostag", "feats"];
        for (target, weight) in all_targets().iter().zip(&weights) {
            if expect_base.contains(&target.as_str()) {
                assert!((weight - base).abs() < 1e-6, "{} got {}", target, weight);
            } else {
                assert_eq!(*weight, MASK, "{} should be masked", target);
            }
        }
    }

    #[test]
    fn test_unmarked_tree_is_fully_masked() {
        let weights = policy().tree_weights(&tree_of(5, &["# text = hi"]), &all_targets());
        assert!(weights.iter().all(|w| *w == MASK));
    }

    #[test]
    fn test_partial_training_disabled_treats_all_as_full() {
        let mut policy = policy();
        policy.train_partial = false;
        let weights = policy.tree_weights(&tree_of(5, &[]), &all_targets());
        assert!((weights[0] - 5.0f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_single_token_tree_has_zero_base_weight() {
        // ln(1) = 0 — a one-token sentence carries no weighted signal
        let weights = policy().tree_weights(&tree_of(1, &["# full_tree"]), &all_targets());
        assert_eq!(weights[0], 0.0);
    }
}
