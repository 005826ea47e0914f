// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Load the treebank          (Layer 4 - data)
//   Step 2: Build the parser           (Layer 5 - ml)
//   Step 3: Fit — sort, batch, train   (Layer 5 - ml)
//           (run artifacts land in out/<run-id>/ via Layer 6)
//
// The parser handles encoder fitting, batching, and the
// training loop internally; this layer only wires the treebank
// source to it and reports where the artifacts went.
//
// Reference: Rust Book §13 (Iterators and Closures)

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::data::loader::ConlluLoader;
use crate::domain::traits::TreebankSource;
use crate::ml::model::BaselineFactory;
use crate::ml::parser::{Parser, ParserConfig};

// ─── Training Configuration ──────────────────────────────────────────────────
// Everything a training run needs. Serialisable so it can be
// persisted with the run artifacts and reloaded for inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// A .conllu file, or a directory of them
    pub train_path: String,
    /// Root directory for run artifacts
    pub output_dir: String,
    /// Word budget per batch (total token count)
    pub batch_size: usize,
    /// Number of training epochs
    pub epochs: usize,
    /// Feature names, in model input order
    pub features: Vec<String>,
    /// Target names, in model output order
    pub targets: Vec<String>,
    /// Whether partially annotated trees participate in training
    pub train_partial: bool,
    /// Comment line marking a fully annotated tree
    pub full_tree_marker: String,
    /// Comment line marking a partially annotated tree
    pub partial_tree_marker: String,
    /// Weight for unsupervised targets — near-zero, never zero
    pub mask_weight: f32,
    /// Keep raw probability rows on predicted trees
    pub save_probs: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        let parser = ParserConfig::default();
        Self {
            train_path: "data/train.conllu".to_string(),
            output_dir: parser.output_dir,
            batch_size: parser.batch_size,
            epochs: parser.epochs,
            features: parser.features,
            targets: parser.targets,
            train_partial: parser.train_partial,
            full_tree_marker: parser.full_tree_marker,
            partial_tree_marker: parser.partial_tree_marker,
            mask_weight: parser.mask_weight,
            save_probs: parser.save_probs,
        }
    }
}

impl TrainConfig {
    /// The slice of this config the orchestration core consumes.
    pub fn parser_config(&self) -> ParserConfig {
        ParserConfig {
            batch_size: self.batch_size,
            features: self.features.clone(),
            targets: self.targets.clone(),
            train_partial: self.train_partial,
            full_tree_marker: self.full_tree_marker.clone(),
            partial_tree_marker: self.partial_tree_marker.clone(),
            mask_weight: self.mask_weight,
            save_probs: self.save_probs,
            epochs: self.epochs,
            output_dir: self.output_dir.clone(),
        }
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
/// Owns the config and runs the training pipeline end to end.
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the pipeline. Returns the run directory.
    pub fn execute(&self) -> Result<PathBuf> {
        let cfg = &self.config;

        // ── Step 1: Load the treebank ─────────────────────────────────────────
        tracing::info!("Loading treebank from '{}'", cfg.train_path);
        let trees = ConlluLoader::new(&cfg.train_path).load_all()?;
        let words: usize = trees.iter().map(|t| t.token_count()).sum();
        tracing::info!("Loaded {} trees, {} tokens", trees.len(), words);

        // ── Step 2: Build the parser ──────────────────────────────────────────
        // Feature/target names are validated here, before any batching
        let mut parser = Parser::new(cfg.parser_config(), Box::new(BaselineFactory))?;

        // ── Step 3: Fit ───────────────────────────────────────────────────────
        let run_dir = parser.fit(&trees)?;
        tracing::info!("Artifacts written to '{}'", run_dir.display());

        Ok(run_dir)
    }
}
