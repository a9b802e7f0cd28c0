// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust types that define what a training session IS:
//
//   config.rs   — model / training configs, presets and
//                 hyperparameter resolution
//   session.rs  — status, feature type and the control
//                 state machine
//   events.rs   — every event the core publishes
//   records.rs  — loss / sample history and registry entries
//   traits.rs   — the host-supplied publish capability
//
// Rules for this layer:
//   - NO Burn framework types
//   - NO file I/O, no tokio
//   - Only plain structs, enums and traits

pub mod config;
pub mod events;
pub mod records;
pub mod session;
pub mod traits;
