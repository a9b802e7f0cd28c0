// ============================================================
// llmbreaker — interactive training of a tiny character-level
// transformer
// ============================================================
// Layers, top to bottom:
//   1. cli          — command line front end (binary only)
//   2. application  — sessions, training loop, control surface
//   3. domain       — configs, state machine, events, records
//   4. data         — corpus loading, vocabulary, batching
//   5. ml           — Burn model and trainer
//   6. infra        — checkpoint registry, metrics channel

#![recursion_limit = "256"]

pub mod application;
pub mod cli;
pub mod data;
pub mod domain;
pub mod infra;
pub mod ml;

pub use application::session_directory::{SessionDirectory, SessionRequestError};
pub use application::settings::EngineSettings;
pub use data::loader::DatasetRef;
pub use domain::config::Hyperparameters;
