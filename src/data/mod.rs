// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from raw treebank files to model-ready batches.
//
// The training-side pipeline flows in this order:
//
//   .conllu files
//       │
//       ▼
//   ConlluLoader       → reads files, builds Tree/Token values
//       │
//       ▼
//   (stable sort by token count — done by the orchestrator)
//       │
//       ▼
//   partition_by_word_budget → shared batch boundaries, computed once
//       │
//       ├─▶ batchify_features → padded feature columns
//       ├─▶ batchify_targets  → padded + dispatch-encoded target columns
//       └─▶ batchify_weights  → per-target sample-weight columns
//       │
//       ▼
//   zip_batches        → aligned Batch triples (row counts verified)
//       │
//       ▼
//   BatchGenerator     → single-pass or cycling pull sequence
//
// Each module is responsible for exactly one step.
//
// Reference: Rust Book §13 (Iterators and Closures)

/// Reads and writes CoNLL-U treebanks
pub mod loader;

/// Converts tokens to numeric columns and predictions back to values
pub mod encoders;

/// Word-budget partition, padding, encoding dispatch, batch zipping
pub mod batcher;

/// Per-tree, per-target sample weights from supervision markers
pub mod weights;

/// Single-pass / cycling batch sequence for the training driver
pub mod generator;
