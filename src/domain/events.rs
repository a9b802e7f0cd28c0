// ============================================================
// Layer 3 — Training Events
// ============================================================
// Every event the core publishes, as one closed enum. The host
// only ever sees (event_name, JSON payload, session_id), which
// `name()` and `payload()` produce.
//
// Event names:
//   training_started   training_paused   training_resumed
//   training_stopped   training_completed
//   training_metrics   generated_sample  attention_snapshot
//   error
//
// Every payload carries `session_id` and a unix-seconds
// `timestamp`. Losses are rounded to 4 decimals.

use serde_json::{json, Value};

use crate::domain::session::FeatureType;

#[derive(Debug, Clone, PartialEq)]
pub enum TrainingEvent {
    Started   { feature_type: FeatureType, max_steps: usize },
    Paused    { step: usize },
    Resumed   { step: usize },
    Stopped   { step: usize },
    Completed {
        final_train_loss:   Option<f64>,
        final_val_loss:     Option<f64>,
        total_time_seconds: Option<f64>,
    },
    Metrics   { step: usize, train_loss: f64, val_loss: f64 },
    Sample    { step: usize, text: String, prompt: String },
    Attention {
        step:   usize,
        layer:  usize,
        head:   usize,
        matrix: Vec<Vec<f32>>,
        tokens: Vec<String>,
    },
    Error     { error_type: String, message: String },
}

impl TrainingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. }   => "training_started",
            Self::Paused { .. }    => "training_paused",
            Self::Resumed { .. }   => "training_resumed",
            Self::Stopped { .. }   => "training_stopped",
            Self::Completed { .. } => "training_completed",
            Self::Metrics { .. }   => "training_metrics",
            Self::Sample { .. }    => "generated_sample",
            Self::Attention { .. } => "attention_snapshot",
            Self::Error { .. }     => "error",
        }
    }

    /// Only attention snapshots go through the rate limiter.
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Attention { .. })
    }

    pub fn payload(&self, session_id: &str) -> Value {
        let mut body = match self {
            Self::Started { feature_type, max_steps } => json!({
                "feature_type": feature_type.as_str(),
                "max_steps":    max_steps,
            }),
            Self::Paused { step } | Self::Resumed { step } | Self::Stopped { step } => {
                json!({ "step": step })
            }
            Self::Completed { final_train_loss, final_val_loss, total_time_seconds } => json!({
                "final_train_loss":   final_train_loss,
                "final_val_loss":     final_val_loss,
                "total_time_seconds": total_time_seconds,
            }),
            Self::Metrics { step, train_loss, val_loss } => json!({
                "step":       step,
                "train_loss": round4(*train_loss),
                "val_loss":   round4(*val_loss),
            }),
            Self::Sample { step, text, prompt } => json!({
                "step":   step,
                "text":   text,
                "prompt": prompt,
            }),
            Self::Attention { step, layer, head, matrix, tokens } => json!({
                "step":   step,
                "layer":  layer,
                "head":   head,
                "matrix": matrix,
                "tokens": tokens,
            }),
            Self::Error { error_type, message } => json!({
                "error_type": error_type,
                "message":    message,
            }),
        };

        if let Value::Object(map) = &mut body {
            map.insert("session_id".to_string(), json!(session_id));
            map.insert("timestamp".to_string(), json!(chrono::Utc::now().timestamp()));
        }
        body
    }
}

pub fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_payload_rounds_losses() {
        let ev = TrainingEvent::Metrics { step: 5, train_loss: 2.123456, val_loss: 3.0 };
        let p  = ev.payload("abc");
        assert_eq!(ev.name(), "training_metrics");
        assert_eq!(p["train_loss"], json!(2.1235));
        assert_eq!(p["session_id"], json!("abc"));
        assert!(p["timestamp"].is_i64());
    }

    #[test]
    fn test_completed_without_start_has_null_time() {
        let ev = TrainingEvent::Completed {
            final_train_loss:   Some(1.0),
            final_val_loss:     None,
            total_time_seconds: None,
        };
        assert!(ev.payload("s")["total_time_seconds"].is_null());
    }

    #[test]
    fn test_only_attention_is_throttled() {
        let att = TrainingEvent::Attention {
            step: 1, layer: 0, head: 0, matrix: vec![vec![1.0]], tokens: vec!["a".into()],
        };
        assert!(att.is_throttled());
        assert!(!TrainingEvent::Paused { step: 1 }.is_throttled());
    }
}
