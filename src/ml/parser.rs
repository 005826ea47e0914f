// ============================================================
// Layer 5 — Parser Orchestrator
// ============================================================
// Ties batching, weighting, the generator, the model, and the
// reassembler together. Owns the two pipeline entry points:
//
//   fit(trees):
//     1. stable-sort trees ascending by token count
//     2. first call only: fit feature + target encoders on the
//        full set, then build the model through the factory
//     3. compute the batch partition ONCE, run the three
//        aligned batching passes against it, zip them
//     4. wrap the batches in a cycling generator and drive the
//        training loop — one step per physical batch per epoch
//     5. persist config + encoders into the run directory so
//        prediction can reload the exact same setup
//
//   predict(trees):
//     1. same sort, same partition rule
//     2. per feature batch: slice the matching tree range by
//        row count (mismatch is fatal), run the model,
//        normalize single-output models into a column list,
//        inverse-transform, reassemble
//     3. sort the collected output by tree identifier —
//        undoing the length sort so callers get their original
//        order back
//
// Reference: Rust Book §13 (Iterators), §17 (Trait Objects)

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::batcher::{
    batchify_features, batchify_targets, batchify_weights, partition_by_word_budget, zip_batches,
};
use crate::data::encoders::{FeatureEncoders, TargetEncoders};
use crate::data::generator::{BatchGenerator, GeneratorMode};
use crate::data::weights::WeightingPolicy;
use crate::domain::tree::Tree;
use crate::infra::checkpoint::RunArtifacts;
use crate::ml::model::{ModelFactory, ParserModel};
use crate::ml::reassembler::reassemble_batch;
use crate::ml::trainer::run_training;

// ─── Configuration ────────────────────────────────────────────────────────────
/// Everything the orchestration core consumes: the word budget,
/// the feature/target lists, the partial-supervision settings,
/// probability retention, and the epoch count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Word budget per batch — total token count, not row count
    pub batch_size: usize,
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
    /// Keep raw per-target probability rows on predicted trees
    pub save_probs: bool,
    /// Number of training epochs
    pub epochs: usize,
    /// Root directory for run artifacts
    pub output_dir: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            batch_size: 2500,
            features: vec!["form".to_string(), "char".to_string()],
            targets: ["head", "deprel", "upostag", "xpostag", "lemma", "feats"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            train_partial: false,
            full_tree_marker: "# full_tree".to_string(),
            partial_tree_marker: "# partial_tree".to_string(),
            mask_weight: 1e-9,
            save_probs: false,
            epochs: 20,
            output_dir: "out".to_string(),
        }
    }
}

impl ParserConfig {
    /// The weighting policy slice of the configuration.
    pub fn weighting_policy(&self) -> WeightingPolicy {
        WeightingPolicy {
            train_partial: self.train_partial,
            full_tree_marker: self.full_tree_marker.clone(),
            partial_tree_marker: self.partial_tree_marker.clone(),
            mask_weight: self.mask_weight,
        }
    }
}

/// What gets persisted to `parser.json` in the run directory.
#[derive(Serialize, Deserialize)]
struct ParserState {
    config: ParserConfig,
    features: FeatureEncoders,
    targets: TargetEncoders,
}

// ─── Parser ───────────────────────────────────────────────────────────────────
/// The orchestrator. Construction validates the configured feature
/// and target names, so batching never sees an unknown name.
pub struct Parser {
    config: ParserConfig,
    features: FeatureEncoders,
    targets: TargetEncoders,
    model: Option<Box<dyn ParserModel>>,
    factory: Box<dyn ModelFactory>,
}

impl Parser {
    pub fn new(config: ParserConfig, factory: Box<dyn ModelFactory>) -> Result<Self> {
        ensure!(config.batch_size > 0, "batch_size must be at least 1 word");
        ensure!(!config.features.is_empty(), "at least one feature is required");
        ensure!(!config.targets.is_empty(), "at least one target is required");
        let features = FeatureEncoders::new(&config.features)?;
        let targets = TargetEncoders::new(&config.targets)?;
        Ok(Self { config, features, targets, model: None, factory })
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Train on the given trees. Returns the run directory holding
    /// this run's artifacts.
    pub fn fit(&mut self, trees: &[Tree]) -> Result<PathBuf> {
        let sorted = sort_by_length(trees);

        if self.model.is_none() {
            self.features.fit(&sorted)?;
            self.targets.fit(&sorted)?;
            self.model = Some(self.factory.build(&self.config, &self.targets)?);
            tracing::info!(
                "Built model for targets [{}] on {} trees",
                self.config.targets.join(", "),
                trees.len(),
            );
        }

        // One partition, three passes against it — the boundary ranges
        // are the single source of truth for all three column sets.
        let bounds = partition_by_word_budget(&sorted, self.config.batch_size);
        let x = batchify_features(&sorted, &self.features, &bounds)?;
        let y = batchify_targets(&sorted, &self.targets, &bounds)?;
        let w = batchify_weights(
            &sorted,
            &self.config.weighting_policy(),
            &self.config.targets,
            &bounds,
        );
        let batches = zip_batches(x, y, w)?;

        let steps_per_epoch = batches.len();
        tracing::info!(
            "Prepared {} batches from {} trees (budget {} words)",
            steps_per_epoch,
            trees.len(),
            self.config.batch_size,
        );

        let mut generator = BatchGenerator::new(batches, GeneratorMode::Cycling);
        let mut artifacts = RunArtifacts::create(&self.config.output_dir)?;
        let model = self.model.as_mut().context("model missing after construction")?;
        run_training(
            model.as_mut(),
            &mut generator,
            steps_per_epoch,
            self.config.epochs,
            &mut artifacts,
        )?;

        self.save(artifacts.dir())?;
        Ok(artifacts.dir().to_path_buf())
    }

    /// Predict annotations for the given trees. The output contains
    /// exactly one tree per input tree, sorted by identifier.
    pub fn predict(&self, trees: &[Tree]) -> Result<Vec<Tree>> {
        let model = self
            .model
            .as_ref()
            .context("no model — call fit() or load a trained parser first")?;
        if trees.is_empty() {
            return Ok(Vec::new());
        }

        let sorted = sort_by_length(trees);
        let bounds = partition_by_word_budget(&sorted, self.config.batch_size);
        let batches = batchify_features(&sorted, &self.features, &bounds)?;

        let mut output = Vec::with_capacity(trees.len());
        let mut cursor = 0usize;
        for batch in &batches {
            let rows = batch
                .first()
                .context("feature batch has no columns")?
                .shape()[0];
            // The tree slice and the batch MUST agree on row count —
            // anything else is a broken invariant, not data to truncate.
            ensure!(
                cursor + rows <= sorted.len(),
                "batch claims rows {}..{} but only {} trees are available",
                cursor,
                cursor + rows,
                sorted.len(),
            );
            let batch_trees = &sorted[cursor..cursor + rows];

            let columns = model.predict_on_batch(batch)?.into_columns();
            let predictions = self.targets.inverse_transform(&columns, batch_trees)?;
            output.extend(reassemble_batch(
                batch_trees,
                &columns,
                &predictions,
                self.targets.names(),
                self.config.save_probs,
            )?);
            cursor += rows;
        }
        ensure!(
            cursor == sorted.len(),
            "batches covered {} of {} trees",
            cursor,
            sorted.len(),
        );

        // Undo the length sort: callers get their ordering back
        output.sort_by_key(|tree| tree.id);
        Ok(output)
    }

    /// Persist config + fitted encoders next to the weight snapshots.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let state = ParserState {
            config: self.config.clone(),
            features: self.features.clone(),
            targets: self.targets.clone(),
        };
        let path = dir.join("parser.json");
        fs::write(&path, serde_json::to_string(&state)?)
            .with_context(|| format!("Cannot write '{}'", path.display()))?;
        tracing::debug!("Saved parser state to '{}'", path.display());
        Ok(())
    }

    /// Reload a trained parser from a run directory.
    pub fn load(dir: &Path, factory: Box<dyn ModelFactory>) -> Result<Self> {
        let path = dir.join("parser.json");
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        let state: ParserState = serde_json::from_str(&json)?;

        let weights = RunArtifacts::latest_weights(dir)?;
        let model = factory.load(&weights)?;
        tracing::info!("Loaded parser from '{}'", dir.display());

        Ok(Self {
            config: state.config,
            features: state.features,
            targets: state.targets,
            model: Some(model),
            factory,
        })
    }
}

/// Sort ascending by token count. `sort_by_key` is stable, so trees
/// of equal length keep their input order — encoder fitting and batch
/// contents stay deterministic.
fn sort_by_length(trees: &[Tree]) -> Vec<&Tree> {
    let mut sorted: Vec<&Tree> = trees.iter().collect();
    sorted.sort_by_key(|tree| tree.token_count());
    sorted
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tree::Token;
    use crate::ml::model::BaselineFactory;

    fn tree_of(id: usize, token_count: usize) -> Tree {
        let tokens = (1..=token_count)
            .map(|i| Token {
                id: i.to_string(),
                form: format!("w{}", (id + i) % 7),
                lemma: "lem".to_string(),
                upostag: "NOUN".to_string(),
                head: (i - 1).to_string(),
                deprel: if i == 1 { "root" } else { "dep" }.to_string(),
                ..Token::default()
            })
            .collect();
        let words = (1..=token_count).map(|i| format!("w{}", (id + i) % 7)).collect();
        Tree::new(id, tokens, words, vec!["# full_tree".to_string()])
    }

    fn test_config(tag: &str) -> ParserConfig {
        ParserConfig {
            batch_size: 6,
            features: vec!["form".to_string()],
            targets: vec!["head".to_string(), "deprel".to_string(), "upostag".to_string()],
            epochs: 2,
            output_dir: std::env::temp_dir()
                .join(format!("parser-test-{}-{}", tag, std::process::id()))
                .to_string_lossy()
                .into_owned(),
            ..ParserConfig::default()
        }
    }

    fn cleanup(config: &ParserConfig) {
        std::fs::remove_dir_all(&config.output_dir).ok();
    }

    #[test]
    fn test_unknown_target_rejected_at_construction() {
        let mut config = test_config("badtarget");
        config.targets.push("colour".to_string());
        assert!(Parser::new(config, Box::new(BaselineFactory)).is_err());
    }

    #[test]
    fn test_predict_requires_a_model() {
        let config = test_config("nomodel");
        let parser = Parser::new(config.clone(), Box::new(BaselineFactory)).unwrap();
        assert!(parser.predict(&[tree_of(0, 2)]).is_err());
        cleanup(&config);
    }

    #[test]
    fn test_fit_on_empty_treebank_is_a_noop() {
        let config = test_config("empty");
        let mut parser = Parser::new(config.clone(), Box::new(BaselineFactory)).unwrap();
        parser.fit(&[]).unwrap();
        assert!(parser.predict(&[]).unwrap().is_empty());
        cleanup(&config);
    }

    #[test]
    fn test_predict_round_trip_preserves_identifiers() {
        let config = test_config("roundtrip");
        // Deliberately unsorted lengths so the internal length sort
        // actually reorders something
        let trees = vec![tree_of(0, 4), tree_of(1, 1), tree_of(2, 3), tree_of(3, 2)];

        let mut parser = Parser::new(config.clone(), Box::new(BaselineFactory)).unwrap();
        parser.fit(&trees).unwrap();
        let predicted = parser.predict(&trees).unwrap();

        // One-to-one, sorted by identifier
        let ids: Vec<usize> = predicted.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        // Token counts survive
        for (input, output) in trees.iter().zip(&predicted) {
            assert_eq!(input.token_count(), output.token_count());
            // Non-target fields pass through
            assert_eq!(input.words, output.words);
            assert_eq!(input.tokens[0].lemma, output.tokens[0].lemma);
        }
        // Target fields were written by the model (uniform head → "0")
        assert_eq!(predicted[0].tokens[0].head, "0");

        cleanup(&config);
    }

    #[test]
    fn test_saved_parser_reloads_and_predicts() {
        let config = test_config("reload");
        let trees = vec![tree_of(0, 2), tree_of(1, 3)];

        let mut parser = Parser::new(config.clone(), Box::new(BaselineFactory)).unwrap();
        let run_dir = parser.fit(&trees).unwrap();

        let reloaded = Parser::load(&run_dir, Box::new(BaselineFactory)).unwrap();
        let predicted = reloaded.predict(&trees).unwrap();
        assert_eq!(predicted.len(), 2);

        cleanup(&config);
    }

    #[test]
    fn test_save_probs_attaches_probabilities() {
        let mut config = test_config("probs");
        config.save_probs = true;
        let trees = vec![tree_of(0, 2), tree_of(1, 2)];

        let mut parser = Parser::new(config.clone(), Box::new(BaselineFactory)).unwrap();
        parser.fit(&trees).unwrap();
        let predicted = parser.predict(&trees).unwrap();
        let probs = predicted[0].probs.as_ref().expect("probabilities retained");
        assert_eq!(probs.len(), 3); // one per target

        cleanup(&config);
    }
}
