// ============================================================
// Layer 3 — Model and Training Configuration
// ============================================================
// The two configuration records every Training Session carries:
//
//   ModelConfig     — the fixed shape of the sequence model
//   TrainingConfig  — the optimisation schedule
//
// Callers never build these directly. They send loose
// Hyperparameters (every field optional, model size given as a
// preset name) and `Hyperparameters::resolve` turns them into
// a validated pair, or a ConfigError before any session exists.
//
// vocab_size is a placeholder until the corpus is prepared;
// the Training Loop overwrites it with the real vocabulary size.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejections raised before a session is ever created.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid dataset reference: {0}")]
    InvalidDataset(String),

    #[error("unknown bundled dataset: {0}")]
    UnknownDataset(String),

    #[error("unsupported corpus file type: {0}")]
    UnsupportedFileType(String),

    #[error("text too short ({len} chars). Minimum {min} characters required.")]
    CorpusTooShort { len: usize, min: usize },

    #[error("text too long ({len} chars). Maximum {max} characters allowed.")]
    CorpusTooLong { len: usize, max: usize },

    #[error("invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),
}

// ─── ModelConfig ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub vocab_size:     usize,
    pub embedding_dim:  usize,
    pub num_layers:     usize,
    pub num_heads:      usize,
    pub context_length: usize,
    pub dropout:        f64,
    pub weight_tying:   bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vocab_size:     65,
            embedding_dim:  64,
            num_layers:     4,
            num_heads:      4,
            context_length: 128,
            dropout:        0.0,
            weight_tying:   true,
        }
    }
}

impl ModelConfig {
    /// Width of a single attention head.
    pub fn head_size(&self) -> usize {
        self.embedding_dim / self.num_heads
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let bad = |msg: String| Err(ConfigError::InvalidHyperparameter(msg));

        if self.vocab_size == 0 {
            return bad("vocab_size must be >= 1".to_string());
        }
        if self.embedding_dim == 0 || self.num_layers == 0 || self.num_heads == 0 {
            return bad("embedding_dim, num_layers and num_heads must be >= 1".to_string());
        }
        if self.embedding_dim % self.num_heads != 0 {
            return bad(format!(
                "embedding_dim ({}) must be divisible by num_heads ({})",
                self.embedding_dim, self.num_heads
            ));
        }
        if self.context_length == 0 {
            return bad("context_length must be >= 1".to_string());
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return bad(format!("dropout must be in [0, 1), got {}", self.dropout));
        }
        Ok(())
    }
}

// ─── TrainingConfig ──────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub batch_size:    usize,
    pub max_steps:     usize,
    pub learning_rate: f64,
    pub eval_interval: usize,
    pub warmup_steps:  usize,
    pub grad_clip:     f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size:    64,
            max_steps:     5000,
            learning_rate: 1e-3,
            eval_interval: 100,
            warmup_steps:  100,
            grad_clip:     1.0,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bad = |msg: &str| Err(ConfigError::InvalidHyperparameter(msg.to_string()));

        if self.batch_size == 0 {
            return bad("batch_size must be >= 1");
        }
        if self.max_steps == 0 {
            return bad("max_steps must be >= 1");
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return bad("learning_rate must be a finite value > 0");
        }
        if self.eval_interval == 0 {
            return bad("eval_interval must be >= 1");
        }
        if !self.grad_clip.is_finite() || self.grad_clip < 0.0 {
            return bad("grad_clip must be a finite value >= 0");
        }
        Ok(())
    }
}

// ─── Model size presets ──────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl ModelSize {
    /// Unknown names fall back to `Medium`.
    pub fn parse_or_default(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "small" => Self::Small,
            "large" => Self::Large,
            _       => Self::Medium,
        }
    }

    /// (embedding_dim, num_layers, num_heads, context_length)
    pub fn dimensions(self) -> (usize, usize, usize, usize) {
        match self {
            Self::Small  => (48, 3, 3, 96),
            Self::Medium => (64, 4, 4, 128),
            Self::Large  => (96, 6, 6, 256),
        }
    }

    pub fn apply(self, cfg: &mut ModelConfig) {
        let (embedding_dim, num_layers, num_heads, context_length) = self.dimensions();
        cfg.embedding_dim  = embedding_dim;
        cfg.num_layers     = num_layers;
        cfg.num_heads      = num_heads;
        cfg.context_length = context_length;
    }
}

// ─── Hyperparameters ─────────────────────────────────────────────────────────
/// Loose, caller-supplied overrides. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    pub model_size:     Option<String>,
    pub embedding_dim:  Option<usize>,
    pub num_layers:     Option<usize>,
    pub num_heads:      Option<usize>,
    pub context_length: Option<usize>,
    pub dropout:        Option<f64>,
    pub weight_tying:   Option<bool>,
    pub batch_size:     Option<usize>,
    pub max_steps:      Option<usize>,
    pub learning_rate:  Option<f64>,
    pub eval_interval:  Option<usize>,
    pub warmup_steps:   Option<usize>,
    pub grad_clip:      Option<f64>,
}

impl Hyperparameters {
    /// Apply preset, then explicit overrides, then validate.
    pub fn resolve(&self) -> Result<(ModelConfig, TrainingConfig), ConfigError> {
        let mut model = ModelConfig::default();
        if let Some(name) = &self.model_size {
            ModelSize::parse_or_default(name).apply(&mut model);
        }
        if let Some(v) = self.embedding_dim  { model.embedding_dim  = v; }
        if let Some(v) = self.num_layers     { model.num_layers     = v; }
        if let Some(v) = self.num_heads      { model.num_heads      = v; }
        if let Some(v) = self.context_length { model.context_length = v; }
        if let Some(v) = self.dropout        { model.dropout        = v; }
        if let Some(v) = self.weight_tying   { model.weight_tying   = v; }

        let mut training = TrainingConfig::default();
        if let Some(v) = self.batch_size    { training.batch_size    = v; }
        if let Some(v) = self.max_steps     { training.max_steps     = v; }
        if let Some(v) = self.learning_rate { training.learning_rate = v; }
        if let Some(v) = self.eval_interval { training.eval_interval = v; }
        if let Some(v) = self.warmup_steps  { training.warmup_steps  = v; }
        if let Some(v) = self.grad_clip     { training.grad_clip     = v; }

        model.validate()?;
        training.validate()?;
        Ok((model, training))
    }
}
