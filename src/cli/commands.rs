// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands: `train` and `predict`
// and all their configurable flags.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for missing args
//   - type conversion (string → usize, f32, Vec<String>)
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};

use crate::application::train_use_case::TrainConfig;

/// The two top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the parser on a CoNLL-U treebank
    Train(TrainArgs),

    /// Annotate a treebank using a trained run directory
    Predict(PredictArgs),
}

/// All arguments for the `train` command.
/// Each field becomes a --flag on the command line.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Training treebank: a .conllu file or a directory of them
    #[arg(long, default_value = "data/train.conllu")]
    pub train_path: String,

    /// Root directory for run artifacts (a timestamped
    /// subdirectory is created per run)
    #[arg(long, default_value = "out")]
    pub output_dir: String,

    /// Word budget per batch — total token count, not tree count.
    /// A batch closes when the next tree would overflow this.
    #[arg(long, default_value_t = 2500)]
    pub batch_size: usize,

    /// Number of full passes over the batch list
    #[arg(long, default_value_t = 20)]
    pub epochs: usize,

    /// Feature names, comma-separated, in model input order
    #[arg(long, value_delimiter = ',', default_value = "form,char")]
    pub features: Vec<String>,

    /// Target names, comma-separated, in model output order
    #[arg(long, value_delimiter = ',', default_value = "head,deprel,upostag,xpostag,lemma,feats")]
    pub targets: Vec<String>,

    /// Enable partial-supervision training: trees marked partial
    /// train only the morphological targets, unmarked trees train
    /// nothing
    #[arg(long, default_value_t = false)]
    pub train_partial: bool,

    /// Comment line that marks a fully annotated tree
    #[arg(long, default_value = "# full_tree")]
    pub full_tree_marker: String,

    /// Comment line that marks a partially annotated tree
    #[arg(long, default_value = "# partial_tree")]
    pub partial_tree_marker: String,

    /// Weight for unsupervised targets. Near-zero but nonzero, so
    /// masked loss terms stay numerically well-behaved
    #[arg(long, default_value_t = 1e-9)]
    pub mask_weight: f32,

    /// Attach raw per-target probability rows to predicted trees
    #[arg(long, default_value_t = false)]
    pub save_probs: bool,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// This is the boundary between Layer 1 and Layer 2 —
/// the application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            train_path:          a.train_path,
            output_dir:          a.output_dir,
            batch_size:          a.batch_size,
            epochs:              a.epochs,
            features:            a.features,
            targets:             a.targets,
            train_partial:       a.train_partial,
            full_tree_marker:    a.full_tree_marker,
            partial_tree_marker: a.partial_tree_marker,
            mask_weight:         a.mask_weight,
            save_probs:          a.save_probs,
        }
    }
}

/// All arguments for the `predict` command
#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Run directory produced by `train` (contains parser.json
    /// and the weight snapshots)
    #[arg(long)]
    pub model_dir: String,

    /// Treebank to annotate: a .conllu file or a directory of them
    #[arg(long)]
    pub input_path: String,

    /// Where to write the annotated CoNLL-U output
    #[arg(long, default_value = "predicted.conllu")]
    pub output_path: String,
}
