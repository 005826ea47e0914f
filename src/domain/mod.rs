// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types that define what the system talks about:
// trees, tokens, and the seams for reading/writing treebanks.
//
// Rules for this layer:
//   - NO model or encoder code
//   - NO file I/O (the traits are declared here, implemented
//     in the data layer)
//   - numeric arrays appear only as opaque payload (retained
//     prediction probabilities)
//
// Think of this layer as the "dictionary" of the system —
// it defines what things ARE, not how they work.
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// A sentence with token-level annotations
pub mod tree;

// Core abstractions (traits) that other layers implement
pub mod traits;
