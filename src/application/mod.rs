// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates the other layers to accomplish one
// goal per use case (training or prediction).
//
// Rules for this layer:
//   - No batching or model math here
//   - No UI or printing here (that's Layer 1)
//   - No direct file-format code (that's Layer 4)
//   - Only workflow coordination
//
// Reference: Rust Book §7 (Module System)

// The training workflow
pub mod train_use_case;

// The prediction workflow
pub mod predict_use_case;
