// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting services shared by every session:
//
//   checkpoint.rs — the Checkpoint Registry. A JSON registry
//                   file replaced atomically on every change,
//                   plus one payload file per checkpoint holding
//                   configs, vocabulary and Burn records.
//
//   metrics.rs    — the Metrics Channel. Session-scoped event
//                   emission with a shared fixed-interval
//                   limiter for attention snapshots, and the
//                   broadcast / tracing publishers.

/// Durable checkpoint registry
pub mod checkpoint;

/// Rate-limited event emission
pub mod metrics;
