// ============================================================
// Layer 2 — Training Session (runtime record)
// ============================================================
// One training run, shared between the control path and the
// session's training task.
//
// Field ownership:
//   control  (watch channel)  — written by control requests;
//                               the loop only writes its own
//                               terminal transitions and the
//                               re-pause after a one-shot step
//   state    (mutex)          — written by the training task:
//                               step, histories, corpus info,
//                               timestamps, error message
//   runner   (mutex)          — model + optimiser; touched by the
//                               training task once per iteration
//                               and by on-demand generation /
//                               checkpointing, never by control
//                               requests
//
// Control requests therefore never wait on a training step.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::Instant,
};
use tokio::sync::watch;

use crate::data::{loader::CorpusSource, vocabulary::Vocabulary};
use crate::domain::{
    config::{ModelConfig, TrainingConfig},
    records::{CorpusStats, LossRecord, SampleRecord},
    session::{ControlState, FeatureType, SessionStatus},
};
use crate::ml::trainer::{ModelRunner, ModelState};

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Model state and vocabulary carried over from a checkpoint.
pub struct WarmStart {
    pub checkpoint_id: String,
    pub step:          usize,
    pub state:         ModelState,
    pub vocabulary:    Vocabulary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResumedFrom {
    pub checkpoint_id: String,
    pub step:          usize,
}

// ─── SessionState ─────────────────────────────────────────────────────────────
pub struct SessionState {
    pub model_config:    ModelConfig,
    pub training_config: TrainingConfig,
    pub source:          CorpusSource,
    pub vocabulary:      Option<Vocabulary>,
    pub corpus_stats:    Option<CorpusStats>,
    pub current_step:    usize,
    pub loss_history:    Vec<LossRecord>,
    pub samples:         Vec<SampleRecord>,
    pub started_at:      Option<DateTime<Utc>>,
    pub started_clock:   Option<Instant>,
    pub completed_at:    Option<DateTime<Utc>>,
    pub error_message:   Option<String>,
    pub resumed_from:    Option<ResumedFrom>,
}

// ─── TrainingSession ──────────────────────────────────────────────────────────
pub struct TrainingSession {
    pub id:           String,
    pub feature_type: FeatureType,
    pub created_at:   DateTime<Utc>,
    pub(crate) control:    watch::Sender<ControlState>,
    pub(crate) state:      Mutex<SessionState>,
    pub(crate) runner:     Mutex<Option<Box<dyn ModelRunner>>>,
    pub(crate) warm_start: Mutex<Option<WarmStart>>,
    loop_spawned:          AtomicBool,
}

impl TrainingSession {
    pub fn new(
        feature_type:    FeatureType,
        model_config:    ModelConfig,
        training_config: TrainingConfig,
        source:          CorpusSource,
        warm_start:      Option<WarmStart>,
    ) -> Self {
        let resumed_from = warm_start.as_ref().map(|w| ResumedFrom {
            checkpoint_id: w.checkpoint_id.clone(),
            step:          w.step,
        });
        let (control, _) = watch::channel(ControlState::default());

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            feature_type,
            created_at: Utc::now(),
            control,
            state: Mutex::new(SessionState {
                model_config,
                training_config,
                source,
                vocabulary:    None,
                corpus_stats:  None,
                current_step:  0,
                loss_history:  Vec::new(),
                samples:       Vec::new(),
                started_at:    None,
                started_clock: None,
                completed_at:  None,
                error_message: None,
                resumed_from,
            }),
            runner:     Mutex::new(None),
            warm_start: Mutex::new(warm_start),
            loop_spawned: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.control.borrow().status
    }

    pub fn control_state(&self) -> ControlState {
        self.control.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControlState> {
        self.control.subscribe()
    }

    /// True exactly once: the caller that flips it owns spawning the loop.
    pub(crate) fn claim_loop(&self) -> bool {
        self.loop_spawned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let control = self.control_state();
        let state   = lock(&self.state);
        SessionSnapshot {
            session_id:       self.id.clone(),
            feature_type:     self.feature_type,
            status:           control.status,
            speed_multiplier: control.speed_multiplier,
            model_config:     state.model_config.clone(),
            training_config:  state.training_config.clone(),
            dataset:          state.source.describe(),
            vocab_size:       state.vocabulary.as_ref().map(Vocabulary::len),
            corpus_stats:     state.corpus_stats,
            current_step:     state.current_step,
            loss_history:     state.loss_history.clone(),
            samples:          state.samples.clone(),
            created_at:       self.created_at,
            started_at:       state.started_at,
            completed_at:     state.completed_at,
            error_message:    state.error_message.clone(),
            resumed_from:     state.resumed_from.clone(),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let status = self.status();
        let state  = lock(&self.state);
        SessionSummary {
            session_id:   self.id.clone(),
            feature_type: self.feature_type,
            status,
            current_step: state.current_step,
            max_steps:    state.training_config.max_steps,
        }
    }
}

// ─── Read-only views ──────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id:       String,
    pub feature_type:     FeatureType,
    pub status:           SessionStatus,
    pub speed_multiplier: f64,
    pub model_config:     ModelConfig,
    pub training_config:  TrainingConfig,
    pub dataset:          String,
    pub vocab_size:       Option<usize>,
    pub corpus_stats:     Option<CorpusStats>,
    pub current_step:     usize,
    pub loss_history:     Vec<LossRecord>,
    pub samples:          Vec<SampleRecord>,
    pub created_at:       DateTime<Utc>,
    pub started_at:       Option<DateTime<Utc>>,
    pub completed_at:     Option<DateTime<Utc>>,
    pub error_message:    Option<String>,
    pub resumed_from:     Option<ResumedFrom>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id:   String,
    pub feature_type: FeatureType,
    pub status:       SessionStatus,
    pub current_step: usize,
    pub max_steps:    usize,
}
