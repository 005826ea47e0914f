// ============================================================
// Layer 5 — Model Seam and Baseline Model
// ============================================================
// The parser treats the network as an opaque collaborator: it
// trains on batches and predicts on batches, and everything
// else about it is somebody else's problem. This module owns
// that seam.
//
//   ParserModel  — what the orchestrator needs from a model:
//                  train_on_batch / predict_on_batch / save
//   ModelFactory — builds a model from the parser configuration
//                  and the fitted target encoders, or reloads
//                  one from a weight snapshot
//   ModelOutput  — a model may return one output array (single
//                  target) or one per target; the orchestrator
//                  normalizes both shapes into a column list
//
// BaselineModel is the default factory product: a weighted
// frequency/mean estimator per target. It exists so training
// and prediction run end-to-end with correct shapes and honest
// losses — it is a diagnostic baseline, not a network. A real
// network plugs in by implementing ParserModel and ModelFactory.
//
// Output shapes, per target:
//   head      → [rows, length, length]   (uniform over positions)
//   category  → [rows, length, vocab]    (learned class frequencies)
//   feats     → [rows, length, vocab]    (learned activation means)
//   sent      → [rows, emb_dim]          (learned mean embedding)
//
// Reference: ndarray crate documentation
//            Rust Book §17 (Trait Objects)

use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use ndarray::{Array1, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::data::encoders::TargetEncoders;
use crate::ml::parser::ParserConfig;

// ─── The seam ─────────────────────────────────────────────────────────────────
/// What the orchestrator and training driver need from a model.
pub trait ParserModel {
    /// One optimisation step on one batch. Returns the batch loss.
    fn train_on_batch(
        &mut self,
        features: &[ArrayD<f32>],
        targets: &[ArrayD<f32>],
        weights: &[Array1<f32>],
    ) -> Result<f64>;

    /// Raw per-target predictions for one feature batch.
    fn predict_on_batch(&self, features: &[ArrayD<f32>]) -> Result<ModelOutput>;

    /// Persist the model state to one file.
    fn save(&self, path: &Path) -> Result<()>;
}

/// A model with a single target returns one array; a multi-target
/// model returns one per target. `into_columns` normalizes both.
#[derive(Debug, Clone)]
pub enum ModelOutput {
    Single(ArrayD<f32>),
    Columns(Vec<ArrayD<f32>>),
}

impl ModelOutput {
    pub fn into_columns(self) -> Vec<ArrayD<f32>> {
        match self {
            ModelOutput::Single(column) => vec![column],
            ModelOutput::Columns(columns) => columns,
        }
    }
}

/// Builds models. The orchestrator owns a boxed factory, so the
/// concrete model is chosen by the caller, not by the pipeline.
pub trait ModelFactory {
    fn build(
        &self,
        config: &ParserConfig,
        targets: &TargetEncoders,
    ) -> Result<Box<dyn ParserModel>>;

    fn load(&self, path: &Path) -> Result<Box<dyn ParserModel>>;
}

// ─── BaselineModel ────────────────────────────────────────────────────────────
/// Per-target running statistics, weighted by the sample weights —
/// so masked trees contribute (next to) nothing, exactly as they
/// would to a network's gradients.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum TargetStats {
    /// Head has a batch-local class space; the baseline predicts a
    /// uniform distribution over it and learns nothing.
    Head { name: String },
    /// Weighted class counts over a fixed vocabulary.
    Category { name: String, counts: Vec<f64> },
    /// Weighted activation totals per feature item.
    Feats { name: String, totals: Vec<f64>, weight: f64 },
    /// Weighted sum of sentence embeddings.
    Sentence { name: String, totals: Vec<f64>, weight: f64 },
}

/// Weighted frequency/mean estimator across all configured targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineModel {
    columns: Vec<TargetStats>,
}

impl BaselineModel {
    /// Build unfitted statistics from the fitted target encoders.
    pub fn new(targets: &TargetEncoders) -> Result<Self> {
        let mut columns = Vec::with_capacity(targets.names().len());
        for name in targets.names() {
            let stats = match name.as_str() {
                "head" => TargetStats::Head { name: name.clone() },
                "sent" => TargetStats::Sentence {
                    name: name.clone(),
                    totals: Vec::new(),
                    weight: 0.0,
                },
                "feats" => TargetStats::Feats {
                    name: name.clone(),
                    totals: vec![0.0; targets.vocab_size(name)?],
                    weight: 0.0,
                },
                _ => TargetStats::Category {
                    name: name.clone(),
                    counts: vec![0.0; targets.vocab_size(name)?],
                },
            };
            columns.push(stats);
        }
        Ok(Self { columns })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read model snapshot '{}'", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl ParserModel for BaselineModel {
    fn train_on_batch(
        &mut self,
        _features: &[ArrayD<f32>],
        targets: &[ArrayD<f32>],
        weights: &[Array1<f32>],
    ) -> Result<f64> {
        ensure!(
            targets.len() == self.columns.len() && weights.len() == self.columns.len(),
            "batch has {} target and {} weight columns for a {}-target model",
            targets.len(),
            weights.len(),
            self.columns.len(),
        );

        let mut loss = 0.0;
        for ((stats, column), row_weights) in self.columns.iter_mut().zip(targets).zip(weights) {
            loss += match stats {
                TargetStats::Head { .. } => {
                    // Uniform distribution over the batch-local positions:
                    // cross-entropy is ln(length) no matter the truth.
                    (column.shape()[1] as f64).ln()
                }
                TargetStats::Category { name, counts } => {
                    ensure!(
                        column.shape()[2] == counts.len(),
                        "'{}' batch has {} classes, model has {}",
                        name,
                        column.shape()[2],
                        counts.len(),
                    );
                    let batch_loss = category_loss(column, row_weights, counts);
                    for (index, &value) in column.indexed_iter() {
                        if value > 0.0 {
                            counts[index[2]] += row_weights[index[0]] as f64 * value as f64;
                        }
                    }
                    batch_loss
                }
                TargetStats::Feats { name, totals, weight } => {
                    ensure!(
                        column.shape()[2] == totals.len(),
                        "'{}' batch has {} items, model has {}",
                        name,
                        column.shape()[2],
                        totals.len(),
                    );
                    let batch_loss = feats_loss(column, row_weights, totals, *weight);
                    let positions = column.shape()[1] as f64;
                    for (index, &value) in column.indexed_iter() {
                        if value > 0.0 {
                            totals[index[2]] += row_weights[index[0]] as f64 * value as f64;
                        }
                    }
                    *weight += row_weights.iter().map(|&w| w as f64).sum::<f64>() * positions;
                    batch_loss
                }
                TargetStats::Sentence { totals, weight, .. } => {
                    let width = column.shape()[1];
                    if totals.len() != width {
                        totals.resize(width, 0.0);
                    }
                    let batch_loss = sentence_loss(column, row_weights, totals, *weight);
                    for (index, &value) in column.indexed_iter() {
                        totals[index[1]] += row_weights[index[0]] as f64 * value as f64;
                    }
                    *weight += row_weights.iter().map(|&w| w as f64).sum::<f64>();
                    batch_loss
                }
            };
        }
        Ok(loss)
    }

    fn predict_on_batch(&self, features: &[ArrayD<f32>]) -> Result<ModelOutput> {
        ensure!(!features.is_empty(), "cannot predict on a batch with no feature columns");
        ensure!(
            features[0].ndim() >= 2,
            "feature column must be at least [rows, length]",
        );
        let rows = features[0].shape()[0];
        let length = features[0].shape()[1];

        let mut columns = Vec::with_capacity(self.columns.len());
        for stats in &self.columns {
            let column = match stats {
                TargetStats::Head { .. } => ArrayD::from_elem(
                    IxDyn(&[rows, length, length]),
                    1.0 / length.max(1) as f32,
                ),
                TargetStats::Category { counts, .. } => {
                    let probs = smoothed_distribution(counts);
                    ArrayD::from_shape_fn(IxDyn(&[rows, length, counts.len()]), |index| {
                        probs[index[2]]
                    })
                }
                TargetStats::Feats { totals, weight, .. } => {
                    let means: Vec<f32> = totals
                        .iter()
                        .map(|&t| (((t + 1.0) / (weight + 2.0)) as f32).clamp(0.0, 1.0))
                        .collect();
                    ArrayD::from_shape_fn(IxDyn(&[rows, length, totals.len()]), |index| {
                        means[index[2]]
                    })
                }
                TargetStats::Sentence { totals, weight, .. } => {
                    let means: Vec<f32> = totals
                        .iter()
                        .map(|&t| if *weight > 0.0 { (t / weight) as f32 } else { 0.0 })
                        .collect();
                    ArrayD::from_shape_fn(IxDyn(&[rows, totals.len()]), |index| means[index[1]])
                }
            };
            columns.push(column);
        }

        // A single-target model hands back a bare array; the orchestrator
        // normalizes it, exercising the same path a real network would.
        Ok(if columns.len() == 1 {
            ModelOutput::Single(columns.remove(0))
        } else {
            ModelOutput::Columns(columns)
        })
    }

    fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string(self)?)
            .with_context(|| format!("Cannot write model snapshot '{}'", path.display()))?;
        tracing::debug!("Saved model snapshot to '{}'", path.display());
        Ok(())
    }
}

/// Laplace-smoothed class distribution from weighted counts.
fn smoothed_distribution(counts: &[f64]) -> Vec<f32> {
    let total: f64 = counts.iter().sum();
    let denominator = total + counts.len() as f64;
    counts.iter().map(|&c| ((c + 1.0) / denominator) as f32).collect()
}

/// Weighted cross-entropy of the one-hot column under the current
/// class distribution.
fn category_loss(column: &ArrayD<f32>, row_weights: &Array1<f32>, counts: &[f64]) -> f64 {
    let probs = smoothed_distribution(counts);
    let mut sum = 0.0;
    let mut weight_total = 0.0;
    for (index, &value) in column.indexed_iter() {
        if value > 0.0 {
            let w = row_weights[index[0]] as f64 * value as f64;
            sum -= w * (probs[index[2]] as f64).max(1e-12).ln();
            weight_total += w;
        }
    }
    if weight_total > 0.0 { sum / weight_total } else { 0.0 }
}

/// Weighted binary cross-entropy of the multi-hot column under the
/// current activation means.
fn feats_loss(column: &ArrayD<f32>, row_weights: &Array1<f32>, totals: &[f64], weight: f64) -> f64 {
    let mut sum = 0.0;
    let mut weight_total = 0.0;
    for (index, &value) in column.indexed_iter() {
        let mean = ((totals[index[2]] + 1.0) / (weight + 2.0)).clamp(1e-6, 1.0 - 1e-6);
        let w = row_weights[index[0]] as f64;
        let v = value as f64;
        sum -= w * (v * mean.ln() + (1.0 - v) * (1.0 - mean).ln());
        weight_total += w;
    }
    if weight_total > 0.0 { sum / weight_total } else { 0.0 }
}

/// Weighted mean squared error of the embedding column against the
/// current mean embedding.
fn sentence_loss(column: &ArrayD<f32>, row_weights: &Array1<f32>, totals: &[f64], weight: f64) -> f64 {
    let mut sum = 0.0;
    let mut weight_total = 0.0;
    for (index, &value) in column.indexed_iter() {
        let mean = if weight > 0.0 { totals[index[1]] / weight } else { 0.0 };
        let w = row_weights[index[0]] as f64;
        let diff = value as f64 - mean;
        sum += w * diff * diff;
        weight_total += w;
    }
    if weight_total > 0.0 { sum / weight_total } else { 0.0 }
}

// ─── BaselineFactory ──────────────────────────────────────────────────────────
/// Default factory: produces BaselineModel instances.
pub struct BaselineFactory;

impl ModelFactory for BaselineFactory {
    fn build(
        &self,
        _config: &ParserConfig,
        targets: &TargetEncoders,
    ) -> Result<Box<dyn ParserModel>> {
        Ok(Box::new(BaselineModel::new(targets)?))
    }

    fn load(&self, path: &Path) -> Result<Box<dyn ParserModel>> {
        Ok(Box::new(BaselineModel::from_file(path)?))
    }
}
