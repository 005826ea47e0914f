// ============================================================
// Layer 2 — PredictUseCase
// ============================================================
// Loads a trained parser from a run directory, annotates a
// treebank with it, and writes the result back out:
//
//   Step 1: Reload parser (config + encoders + weights)
//   Step 2: Load the input treebank
//   Step 3: Predict — batches, model, reassembly
//   Step 4: Write the predicted trees as CoNLL-U
//
// The predicted output preserves the input ordering — the
// parser re-sorts by tree identifier after its internal
// length-sorted processing.

use anyhow::Result;

use crate::data::loader::{ConlluLoader, ConlluWriter};
use crate::domain::traits::{TreebankSink, TreebankSource};
use crate::ml::model::BaselineFactory;
use crate::ml::parser::Parser;

pub struct PredictUseCase {
    model_dir: String,
    input_path: String,
    output_path: String,
}

impl PredictUseCase {
    pub fn new(model_dir: String, input_path: String, output_path: String) -> Self {
        Self { model_dir, input_path, output_path }
    }

    /// Run prediction end to end. Returns the number of trees written.
    pub fn execute(&self) -> Result<usize> {
        // ── Step 1: Reload the trained parser ─────────────────────────────────
        let parser = Parser::load(
            std::path::Path::new(&self.model_dir),
            Box::new(BaselineFactory),
        )?;

        // ── Step 2: Load the input treebank ───────────────────────────────────
        let trees = ConlluLoader::new(&self.input_path).load_all()?;
        tracing::info!("Predicting {} trees", trees.len());

        // ── Step 3: Predict ───────────────────────────────────────────────────
        let predicted = parser.predict(&trees)?;

        // ── Step 4: Write the output ──────────────────────────────────────────
        ConlluWriter::new(&self.output_path).write_all(&predicted)?;

        Ok(predicted.len())
    }
}
