// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The seams between the orchestration core and the outside
// world. The application layer programs against these traits,
// so the concrete treebank format can be swapped without
// touching any pipeline code.
//
// Implementations:
//   - ConlluLoader implements TreebankSource
//   - ConlluWriter implements TreebankSink
//
// The model and encoder seams live in the ml layer — they need
// the numeric batch types, which the domain layer stays free of.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;

use crate::domain::tree::Tree;

// ─── TreebankSource ───────────────────────────────────────────────────────────
/// Any component that can produce a set of annotated trees.
///
/// An empty source is legitimate: it yields an empty Vec,
/// and every downstream stage treats "no trees" as a no-op.
pub trait TreebankSource {
    /// Load all available trees, with identifiers assigned in input order.
    fn load_all(&self) -> Result<Vec<Tree>>;
}

// ─── TreebankSink ─────────────────────────────────────────────────────────────
/// Any component that can persist a set of trees.
pub trait TreebankSink {
    /// Write the trees out, in the order given.
    fn write_all(&self, trees: &[Tree]) -> Result<()>;
}
