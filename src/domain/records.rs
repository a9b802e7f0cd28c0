// ============================================================
// Layer 3 — History and Registry Records
// ============================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::session::FeatureType;

/// One evaluation point in a session's loss history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossRecord {
    pub step:       usize,
    pub train_loss: f64,
    pub val_loss:   f64,
}

/// One generated sample in a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub step:   usize,
    pub text:   String,
    pub prompt: String,
}

/// Summary statistics of a prepared corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub char_count: usize,
    pub word_count: usize,
    pub vocab_size: usize,
}

/// Registry entry for a saved checkpoint. The payload itself lives
/// in `filename`, next to the registry file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub id:           String,
    pub name:         String,
    pub feature_type: FeatureType,
    pub filename:     String,
    pub step:         usize,
    pub train_loss:   Option<f64>,
    pub created_at:   DateTime<Utc>,
}
