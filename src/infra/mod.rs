// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns that don't belong to any one business
// layer:
//
//   checkpoint.rs — Run directories and weight snapshots.
//                   Names each run by a UTC timestamp, saves
//                   snapshots only on loss improvement, and
//                   keeps a pointer to the newest one so
//                   loading never parses filenames.
//
//   metrics.rs    — Training metrics logging. Appends one
//                   epoch,loss row per epoch to metrics.csv
//                   inside the run directory.
//
// Reference: Rust Book §7 (Modules), §9 (Error Handling)

/// Run directories and model weight snapshots
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;
