// ============================================================
// Layer 2 — Engine Settings
// ============================================================
// The one explicit configuration value for the whole engine.
// It is handed to the Session Directory at construction and
// copied into every Training Loop invocation; nothing reads
// ambient or global configuration.
//
// Loadable from a JSON file; every field is optional there and
// falls back to the defaults below.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Directory holding the bundled corpora (`shakespeare.txt`, ...)
    pub datasets_dir:        PathBuf,
    /// Directory holding the checkpoint registry and payloads
    pub checkpoints_dir:     PathBuf,
    /// Attention snapshots allowed per second, across all sessions
    pub attention_max_rate:  f64,
    /// Upper bound on batches averaged per split when estimating loss
    pub eval_iters:          usize,
    /// Length of the sample generated at each evaluation
    pub sample_tokens:       usize,
    pub sample_temperature:  f64,
    /// Per-iteration yield at speed 1.0, in milliseconds
    pub base_yield_ms:       f64,
    /// At or above this speed the loop yields without sleeping
    pub max_speed_threshold: f64,
    /// Floor for speed multipliers
    pub min_speed:           f64,
    pub min_corpus_chars:    usize,
    pub max_corpus_chars:    usize,
    pub val_fraction:        f64,
    /// Fixed RNG seed for reproducible batches and samples
    pub seed:                Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            datasets_dir:        PathBuf::from("datasets"),
            checkpoints_dir:     PathBuf::from("checkpoints"),
            attention_max_rate:  30.0,
            eval_iters:          20,
            sample_tokens:       80,
            sample_temperature:  0.8,
            base_yield_ms:       10.0,
            max_speed_threshold: 10.0,
            min_speed:           0.1,
            min_corpus_chars:    100,
            max_corpus_chars:    5_000_000,
            val_fraction:        0.1,
            seed:                None,
        }
    }
}

impl EngineSettings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read settings from '{}'", path.display()))?;
        let settings: Self = serde_json::from_str(&json)
            .with_context(|| format!("Invalid settings file '{}'", path.display()))?;
        tracing::debug!("Loaded engine settings from '{}'", path.display());
        Ok(settings)
    }
}
