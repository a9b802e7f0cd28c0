// ============================================================
// Layer 2 — Application / Orchestration
// ============================================================
// Coordinates the lower layers into interactive training runs.
//
//   settings.rs          — EngineSettings, the one explicit
//                          configuration value
//   session.rs           — TrainingSession: control channel,
//                          loop-owned state, model slot
//   training_loop.rs     — the per-session training task
//   session_directory.rs — the control surface hosts call
//
// No tensor math lives here; the loop hands every numeric step
// to Layer 5 through the ModelRunner trait.

/// Engine-wide configuration
pub mod settings;

/// Runtime record of one session
pub mod session;

/// Per-session training task
pub mod training_loop;

/// Session map and control operations
pub mod session_directory;
