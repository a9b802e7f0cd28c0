// ============================================================
// Layer 2 — Session Directory (control surface)
// ============================================================
// The in-memory map of live sessions and every operation a host
// may invoke on them. Sessions are ephemeral; only checkpoints
// outlive the process.
//
// Control requests (start / pause / resume / step_once / stop /
// set_speed / delete) are quick mutations of a session's watch
// channel and never wait on a training step. Operations that
// touch the model (save_checkpoint, generate_text,
// predict_next_token) are async and run on the blocking pool.
//
// Unknown session ids give `false` / `None` / `NotFound`;
// nothing here panics on bad input.

use chrono::Utc;
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Instant,
};
use thiserror::Error;
use tokio::sync::watch;

use crate::application::{
    session::{lock, SessionSnapshot, SessionSummary, TrainingSession, WarmStart},
    settings::EngineSettings,
    training_loop::{self, LoopContext},
};
use crate::data::loader::{CorpusLoader, DatasetRef};
use crate::domain::{
    config::{ConfigError, Hyperparameters},
    events::TrainingEvent,
    records::CheckpointRecord,
    session::{ControlCommand, ControlState, FeatureType},
    traits::EventPublisher,
};
use crate::infra::{
    checkpoint::{CheckpointError, CheckpointPayload, CheckpointRegistry},
    metrics::{MetricsChannel, RateLimiter},
};
use crate::ml::model::sample_index;

/// Outcomes of the model-touching requests.
#[derive(Debug, Error)]
pub enum SessionRequestError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session {0} has no model yet")]
    ModelNotReady(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("request failed: {0}")]
    Runtime(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenProbability {
    pub token:       String,
    pub probability: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextTokenPrediction {
    /// The token drawn from the distribution at the given temperature
    pub token: String,
    /// Most likely tokens, most likely first
    pub top_k: Vec<TokenProbability>,
}

// ─── SessionDirectory ─────────────────────────────────────────────────────────
pub struct SessionDirectory {
    settings: EngineSettings,
    sessions: RwLock<HashMap<String, Arc<TrainingSession>>>,
    registry: Arc<CheckpointRegistry>,
    loader:   CorpusLoader,
    channel:  MetricsChannel,
}

impl SessionDirectory {
    pub fn new(settings: EngineSettings, publisher: Arc<dyn EventPublisher>) -> Self {
        let limiter  = Arc::new(RateLimiter::new(settings.attention_max_rate));
        let registry = Arc::new(CheckpointRegistry::new(settings.checkpoints_dir.clone()));
        let loader   = CorpusLoader::new(
            settings.datasets_dir.clone(),
            settings.min_corpus_chars,
            settings.max_corpus_chars,
        );

        Self {
            settings,
            sessions: RwLock::new(HashMap::new()),
            registry,
            loader,
            channel: MetricsChannel::new(publisher, limiter),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &CheckpointRegistry {
        &self.registry
    }

    // ─── Creation ───────────────────────────────────────────────────────────
    /// Validate everything up front; an error means no session exists.
    pub fn create_session(
        &self,
        feature_type:    &str,
        dataset:         &DatasetRef,
        hyperparameters: &Hyperparameters,
    ) -> Result<String, ConfigError> {
        let feature_type               = FeatureType::parse_or_default(feature_type);
        let source                     = self.loader.resolve(dataset)?;
        let (model_cfg, training_cfg)  = hyperparameters.resolve()?;

        let session = TrainingSession::new(feature_type, model_cfg, training_cfg, source, None);
        tracing::info!(
            "Created session {} ({}, dataset {})",
            session.id, feature_type, lock(&session.state).source.describe(),
        );
        Ok(self.insert(session))
    }

    /// New session seeded from a checkpoint's configs, vocabulary,
    /// weights and optimizer state. Training restarts at step 0.
    pub fn create_session_from_checkpoint(
        &self,
        checkpoint_id: &str,
        feature_type:  &str,
        dataset:       &DatasetRef,
    ) -> Result<String, SessionRequestError> {
        let feature_type        = FeatureType::parse_or_default(feature_type);
        let source              = self.loader.resolve(dataset)?;
        let (record, payload)   = self.registry.load(checkpoint_id)?;

        let warm = WarmStart {
            checkpoint_id: record.id.clone(),
            step:          payload.step,
            state:         payload.state(),
            vocabulary:    payload.vocabulary,
        };
        let session = TrainingSession::new(
            feature_type,
            payload.model_config,
            payload.training_config,
            source,
            Some(warm),
        );
        tracing::info!(
            "Created session {} from checkpoint '{}' ({}, step {})",
            session.id, record.name, record.id, record.step,
        );
        Ok(self.insert(session))
    }

    fn insert(&self, session: TrainingSession) -> String {
        let id = session.id.clone();
        self.sessions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id.clone(), Arc::new(session));
        id
    }

    fn find(&self, id: &str) -> Option<Arc<TrainingSession>> {
        self.sessions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
    }

    // ─── Queries ────────────────────────────────────────────────────────────
    pub fn get_session(&self, id: &str) -> Option<SessionSnapshot> {
        self.find(id).map(|s| s.snapshot())
    }

    /// Oldest first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<_> = self
            .sessions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions.iter().map(|s| s.summary()).collect()
    }

    pub fn subscribe(&self, id: &str) -> Option<watch::Receiver<ControlState>> {
        self.find(id).map(|s| s.subscribe())
    }

    // ─── Control ────────────────────────────────────────────────────────────
    /// Spawns the session's training task on the first accepted start.
    /// Must be called from inside a tokio runtime.
    pub fn start(&self, id: &str) -> bool {
        let Some(session) = self.find(id) else { return false };
        if !self.transition(&session, ControlCommand::Start) {
            return false;
        }

        let max_steps = {
            let mut state = lock(&session.state);
            if state.started_at.is_none() {
                state.started_at    = Some(Utc::now());
                state.started_clock = Some(Instant::now());
            }
            state.training_config.max_steps
        };
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                let message = format!("no async runtime to run the training loop: {e}");
                if session.control.send_if_modified(|s| s.fail()) {
                    lock(&session.state).error_message = Some(message.clone());
                    tracing::error!("Session {}: {}", session.id, message);
                    self.channel.emit(&session.id, &TrainingEvent::Error {
                        error_type: "training_step_error".to_string(),
                        message,
                    });
                }
                return false;
            }
        };

        // Started goes out before the loop can publish anything.
        self.channel.emit(&session.id, &TrainingEvent::Started {
            feature_type: session.feature_type,
            max_steps,
        });
        if session.claim_loop() {
            let ctx = LoopContext {
                settings: self.settings.clone(),
                channel:  self.channel.clone(),
                loader:   self.loader.clone(),
            };
            handle.spawn(training_loop::run(session.clone(), ctx));
        }
        true
    }

    pub fn pause(&self, id: &str) -> bool {
        self.control(id, ControlCommand::Pause, |step| TrainingEvent::Paused { step })
    }

    pub fn resume(&self, id: &str) -> bool {
        self.control(id, ControlCommand::Resume, |step| TrainingEvent::Resumed { step })
    }

    pub fn stop(&self, id: &str) -> bool {
        self.control(id, ControlCommand::Stop, |step| TrainingEvent::Stopped { step })
    }

    pub fn step_once(&self, id: &str) -> bool {
        match self.find(id) {
            Some(session) => self.transition(&session, ControlCommand::StepOnce),
            None => false,
        }
    }

    pub fn set_speed(&self, id: &str, multiplier: f64) -> bool {
        let Some(session) = self.find(id) else { return false };
        let min = self.settings.min_speed;
        let accepted = session.control.send_if_modified(|s| s.set_speed(multiplier, min));
        tracing::debug!("Session {}: set_speed({}) accepted={}", id, multiplier, accepted);
        accepted
    }

    /// Removes the session, stopping its loop first.
    pub fn delete_session(&self, id: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id);
        match removed {
            Some(session) => {
                session.control.send_if_modified(|s| s.apply(ControlCommand::Stop));
                tracing::info!("Deleted session {}", id);
                true
            }
            None => false,
        }
    }

    fn control(&self, id: &str, cmd: ControlCommand, event: impl FnOnce(usize) -> TrainingEvent) -> bool {
        let Some(session) = self.find(id) else { return false };
        if !self.transition(&session, cmd) {
            return false;
        }
        let step = lock(&session.state).current_step;
        self.channel.emit(&session.id, &event(step));
        true
    }

    fn transition(&self, session: &TrainingSession, cmd: ControlCommand) -> bool {
        let accepted = session.control.send_if_modified(|s| s.apply(cmd));
        if accepted {
            tracing::debug!("Session {}: {:?} -> {}", session.id, cmd, session.status());
        } else {
            tracing::debug!("Session {}: {:?} rejected in {}", session.id, cmd, session.status());
        }
        accepted
    }

    // ─── Model-touching requests ────────────────────────────────────────────
    /// Snapshot the live model and optimizer into the registry.
    pub async fn save_checkpoint(
        &self,
        id:   &str,
        name: Option<&str>,
    ) -> Result<CheckpointRecord, SessionRequestError> {
        let session  = self.find(id).ok_or_else(|| SessionRequestError::NotFound(id.to_string()))?;
        let registry = self.registry.clone();
        let name     = name.map(str::to_string);

        run_blocking(move || {
            // Holding the runner keeps the loop from stepping, so the
            // state read below matches the exported weights.
            let runner_slot = lock(&session.runner);
            let runner = runner_slot
                .as_ref()
                .ok_or_else(|| SessionRequestError::ModelNotReady(session.id.clone()))?;
            let (model_config, training_config, vocabulary, step, train_loss) = {
                let state = lock(&session.state);
                (
                    state.model_config.clone(),
                    state.training_config.clone(),
                    state.vocabulary.clone(),
                    state.current_step,
                    state.loss_history.last().map(|r| r.train_loss),
                )
            };
            let vocabulary = vocabulary.ok_or_else(|| SessionRequestError::ModelNotReady(session.id.clone()))?;
            let exported = runner
                .export_state()
                .map_err(|e| SessionRequestError::Runtime(format!("{e:#}")))?;
            drop(runner_slot);

            let payload = CheckpointPayload {
                model_config,
                training_config,
                vocabulary,
                step,
                train_loss,
                model_state:     exported.model,
                optimizer_state: exported.optimizer,
            };
            let default_name = format!("{} step {}", session.feature_type, step);

            let name = name.unwrap_or(default_name);
            Ok(registry.save(&payload, session.feature_type, &name)?)
        })
        .await
    }

    /// Continue `prompt` by `steps` characters. The result starts with
    /// the in-vocabulary part of the prompt (or the id-0 seed character
    /// when that is empty).
    pub async fn generate_text(
        &self,
        id:          &str,
        prompt:      &str,
        steps:       usize,
        temperature: f64,
    ) -> Result<String, SessionRequestError> {
        let session = self.find(id).ok_or_else(|| SessionRequestError::NotFound(id.to_string()))?;
        let prompt  = prompt.to_string();
        let mut rng = self.rng();

        run_blocking(move || {
            let vocabulary = lock(&session.state)
                .vocabulary
                .clone()
                .ok_or_else(|| SessionRequestError::ModelNotReady(session.id.clone()))?;
            let runner_slot = lock(&session.runner);
            let runner = runner_slot
                .as_ref()
                .ok_or_else(|| SessionRequestError::ModelNotReady(session.id.clone()))?;

            let seed = vocabulary.encode(&prompt);
            let ids  = runner
                .generate(&seed, steps, temperature, &mut rng)
                .map_err(|e| SessionRequestError::Runtime(format!("{e:#}")))?;
            Ok(vocabulary.decode(&ids))
        })
        .await
    }

    pub async fn predict_next_token(
        &self,
        id:          &str,
        context:     &str,
        temperature: f64,
        top_k:       usize,
    ) -> Result<NextTokenPrediction, SessionRequestError> {
        let session = self.find(id).ok_or_else(|| SessionRequestError::NotFound(id.to_string()))?;
        let context = context.to_string();
        let mut rng = self.rng();

        run_blocking(move || {
            let vocabulary = lock(&session.state)
                .vocabulary
                .clone()
                .ok_or_else(|| SessionRequestError::ModelNotReady(session.id.clone()))?;
            let runner_slot = lock(&session.runner);
            let runner = runner_slot
                .as_ref()
                .ok_or_else(|| SessionRequestError::ModelNotReady(session.id.clone()))?;

            let probs = runner
                .next_token_probabilities(&vocabulary.encode(&context), temperature)
                .map_err(|e| SessionRequestError::Runtime(format!("{e:#}")))?;
            let drawn = sample_index(&probs, temperature, &mut rng);

            let mut ranked: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
            let top_k = ranked
                .into_iter()
                .take(top_k)
                .map(|(i, probability)| TokenProbability {
                    token: vocabulary.decode(&[i as u32]),
                    probability,
                })
                .collect();

            Ok(NextTokenPrediction { token: vocabulary.decode(&[drawn]), top_k })
        })
        .await
    }

    fn rng(&self) -> StdRng {
        match self.settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None       => StdRng::from_entropy(),
        }
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, SessionRequestError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SessionRequestError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SessionRequestError::Runtime(e.to_string()))?
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::SessionStatus;
    use crate::infra::metrics::{BroadcastPublisher, PublishedEvent};
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn corpus() -> String {
        "the quick brown fox jumps over the lazy dog. ".repeat(12)
    }

    fn settings(dir: &std::path::Path) -> EngineSettings {
        EngineSettings {
            datasets_dir:    dir.join("datasets"),
            checkpoints_dir: dir.join("checkpoints"),
            eval_iters:      2,
            sample_tokens:   12,
            base_yield_ms:   0.0,
            seed:            Some(7),
            ..EngineSettings::default()
        }
    }

    fn tiny(max_steps: usize, eval_interval: usize) -> Hyperparameters {
        Hyperparameters {
            embedding_dim:  Some(16),
            num_layers:     Some(1),
            num_heads:      Some(2),
            context_length: Some(8),
            batch_size:     Some(4),
            max_steps:      Some(max_steps),
            eval_interval:  Some(eval_interval),
            warmup_steps:   Some(2),
            ..Hyperparameters::default()
        }
    }

    fn directory(dir: &std::path::Path) -> (SessionDirectory, broadcast::Receiver<PublishedEvent>) {
        let publisher = Arc::new(BroadcastPublisher::new(4096));
        let events    = publisher.subscribe();
        (SessionDirectory::new(settings(dir), publisher), events)
    }

    async fn wait_terminal(dir: &SessionDirectory, id: &str) -> SessionStatus {
        let mut rx = dir.subscribe(id).unwrap();
        let state = tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| s.status.is_terminal()))
            .await
            .expect("session did not finish in time")
            .unwrap()
            .clone();
        state.status
    }

    fn drain(events: &mut broadcast::Receiver<PublishedEvent>) -> Vec<PublishedEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = events.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ten_step_run_completes_with_three_evaluations() {
        let tmp = tempfile::tempdir().unwrap();
        let (dir, mut events) = directory(tmp.path());
        let id = dir.create_session("watch_learn", &DatasetRef::Text(corpus()), &tiny(10, 5)).unwrap();

        assert!(dir.start(&id));
        assert_eq!(wait_terminal(&dir, &id).await, SessionStatus::Completed);

        let snap = dir.get_session(&id).unwrap();
        assert_eq!(snap.current_step, 10);
        assert_eq!(snap.loss_history.iter().map(|r| r.step).collect::<Vec<_>>(), vec![1, 5, 10]);
        assert_eq!(snap.samples.len(), 3);
        assert!(snap.completed_at.is_some());
        assert!(snap.corpus_stats.is_some());

        let events = drain(&mut events);
        let metric_steps: Vec<u64> = events
            .iter()
            .filter(|e| e.event == "training_metrics")
            .map(|e| e.payload["step"].as_u64().unwrap())
            .collect();
        assert_eq!(metric_steps, vec![1, 5, 10]);
        assert_eq!(events.iter().filter(|e| e.event == "generated_sample").count(), 3);
        assert_eq!(events.iter().filter(|e| e.event == "training_started").count(), 1);

        let completed: Vec<_> = events.iter().filter(|e| e.event == "training_completed").collect();
        assert_eq!(completed.len(), 1);
        assert!(completed[0].payload["final_train_loss"].is_f64());
        assert!(completed[0].payload["total_time_seconds"].is_f64());

        for attention in events.iter().filter(|e| e.event == "attention_snapshot") {
            assert_eq!(attention.payload["tokens"].as_array().unwrap().len(), 8);
            assert_eq!(attention.payload["matrix"].as_array().unwrap().len(), 8);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_control_transitions_through_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let (dir, _events) = directory(tmp.path());
        let id = dir.create_session("watch_learn", &DatasetRef::Text(corpus()), &tiny(100_000, 1_000)).unwrap();

        assert!(!dir.pause(&id));
        assert!(!dir.resume(&id));
        assert!(!dir.step_once(&id));
        assert!(dir.start(&id));
        assert!(!dir.start(&id));
        assert!(dir.pause(&id));
        assert!(!dir.pause(&id));

        // Let an iteration that was already in flight settle.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let before = dir.get_session(&id).unwrap().current_step;

        let mut rx = dir.subscribe(&id).unwrap();
        assert!(dir.step_once(&id));
        tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| s.status == SessionStatus::Paused))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dir.get_session(&id).unwrap().current_step, before + 1);

        assert!(dir.set_speed(&id, 0.0));
        assert_eq!(dir.get_session(&id).unwrap().speed_multiplier, dir.settings().min_speed);

        assert!(dir.stop(&id));
        assert!(!dir.stop(&id));
        assert!(!dir.resume(&id));
        assert!(!dir.start(&id));
        assert!(!dir.set_speed(&id, 2.0));
        assert_eq!(dir.get_session(&id).unwrap().status, SessionStatus::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resume_after_pending_step_keeps_running() {
        let tmp = tempfile::tempdir().unwrap();
        let (dir, _events) = directory(tmp.path());
        let id = dir.create_session("watch_learn", &DatasetRef::Text(corpus()), &tiny(100_000, 1_000)).unwrap();

        assert!(dir.start(&id));
        assert!(dir.pause(&id));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(dir.step_once(&id));
        assert!(dir.pause(&id));
        let before = dir.get_session(&id).unwrap().current_step;
        assert!(dir.resume(&id));
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let snap = dir.get_session(&id).unwrap();
        assert_eq!(snap.status, SessionStatus::Running);
        assert!(snap.current_step > before + 1);
        assert!(dir.stop(&id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_before_pending_step_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let (dir, _events) = directory(tmp.path());
        let id = dir.create_session("watch_learn", &DatasetRef::Text(corpus()), &tiny(100_000, 1_000)).unwrap();

        assert!(dir.start(&id));
        assert!(dir.pause(&id));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(dir.step_once(&id));
        assert!(dir.stop(&id));
        let state = dir.subscribe(&id).unwrap().borrow().clone();
        assert_eq!(state.status, SessionStatus::Stopped);
        assert!(!state.step_once);
        assert!(!dir.resume(&id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_checkpoint_then_warm_start() {
        let tmp = tempfile::tempdir().unwrap();
        let (dir, _events) = directory(tmp.path());
        let id = dir.create_session("watch_learn", &DatasetRef::Text(corpus()), &tiny(4, 2)).unwrap();

        assert!(matches!(
            dir.save_checkpoint(&id, None).await,
            Err(SessionRequestError::ModelNotReady(_))
        ));

        assert!(dir.start(&id));
        assert_eq!(wait_terminal(&dir, &id).await, SessionStatus::Completed);

        let record = dir.save_checkpoint(&id, None).await.unwrap();
        assert_eq!(record.name, "watch_learn step 4");
        assert_eq!(record.step, 4);
        assert!(record.train_loss.is_some());
        assert_eq!(dir.registry().list().len(), 1);

        let resumed = dir
            .create_session_from_checkpoint(&record.id, "attention_cinema", &DatasetRef::Text(corpus()))
            .unwrap();
        let snap = dir.get_session(&resumed).unwrap();
        assert_eq!(snap.current_step, 0);
        assert_eq!(snap.feature_type, FeatureType::AttentionCinema);
        assert_eq!(snap.resumed_from.as_ref().map(|r| r.step), Some(4));
        assert_eq!(snap.model_config, dir.get_session(&id).unwrap().model_config);

        assert!(dir.start(&resumed));
        assert_eq!(wait_terminal(&dir, &resumed).await, SessionStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_generation_on_a_trained_session() {
        let tmp = tempfile::tempdir().unwrap();
        let (dir, _events) = directory(tmp.path());
        let id = dir.create_session("style_transfer", &DatasetRef::Text(corpus()), &tiny(3, 3)).unwrap();
        assert!(dir.start(&id));
        wait_terminal(&dir, &id).await;

        let text = dir.generate_text(&id, "the", 20, 0.8).await.unwrap();
        assert!(text.starts_with("the"));
        assert_eq!(text.chars().count(), 23);

        let prediction = dir.predict_next_token(&id, "the qu", 1.0, 3).await.unwrap();
        assert_eq!(prediction.top_k.len(), 3);
        assert!(prediction.top_k.windows(2).all(|w| w[0].probability >= w[1].probability));
        assert_eq!(prediction.token.chars().count(), 1);

        assert!(matches!(
            dir.generate_text("nope", "x", 1, 1.0).await,
            Err(SessionRequestError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_runtime_faults_end_in_error() {
        let tmp = tempfile::tempdir().unwrap();
        let (dir, mut events) = directory(tmp.path());

        let short_file = tmp.path().join("short.txt");
        std::fs::write(&short_file, "too short").unwrap();
        let load_fail = dir.create_session("watch_learn", &DatasetRef::File(short_file), &tiny(5, 5)).unwrap();

        let mut big_ctx = tiny(5, 5);
        big_ctx.context_length = Some(64);
        let prepare_fail = dir
            .create_session("watch_learn", &DatasetRef::Text("abcdefghij".repeat(12)), &big_ctx)
            .unwrap();

        for id in [&load_fail, &prepare_fail] {
            assert!(dir.start(id));
            assert_eq!(wait_terminal(&dir, id).await, SessionStatus::Error);
            assert!(dir.get_session(id).unwrap().error_message.is_some());
        }

        let error_types: Vec<(String, String)> = drain(&mut events)
            .into_iter()
            .filter(|e| e.event == "error")
            .map(|e| (e.session_id, e.payload["error_type"].as_str().unwrap().to_string()))
            .collect();
        assert!(error_types.contains(&(load_fail.clone(), "dataset_load_error".to_string())));
        assert!(error_types.contains(&(prepare_fail.clone(), "dataset_prepare_error".to_string())));
    }

    #[test]
    fn test_config_errors_create_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let (dir, _events) = directory(tmp.path());

        assert!(matches!(
            dir.create_session("watch_learn", &DatasetRef::Text("short".into()), &Hyperparameters::default()),
            Err(ConfigError::CorpusTooShort { .. })
        ));
        assert!(matches!(
            dir.create_session("watch_learn", &DatasetRef::Bundled("klingon".into()), &Hyperparameters::default()),
            Err(ConfigError::UnknownDataset(_))
        ));

        let mut bad = tiny(10, 5);
        bad.num_heads = Some(3);
        assert!(matches!(
            dir.create_session("watch_learn", &DatasetRef::Text(corpus()), &bad),
            Err(ConfigError::InvalidHyperparameter(_))
        ));

        assert!(matches!(
            dir.create_session_from_checkpoint("missing", "watch_learn", &DatasetRef::Text(corpus())),
            Err(SessionRequestError::Checkpoint(CheckpointError::NotFound(_)))
        ));
        assert!(dir.list_sessions().is_empty());
    }

    #[test]
    fn test_unknown_ids_and_deletion() {
        let tmp = tempfile::tempdir().unwrap();
        let (dir, _events) = directory(tmp.path());

        assert!(dir.get_session("nope").is_none());
        assert!(!dir.pause("nope"));
        assert!(!dir.set_speed("nope", 2.0));
        assert!(!dir.delete_session("nope"));

        let id = dir.create_session("mystery", &DatasetRef::Text(corpus()), &tiny(10, 5)).unwrap();
        let summaries = dir.list_sessions();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].feature_type, FeatureType::WatchLearn);
        assert_eq!(summaries[0].max_steps, 10);

        let rx = dir.subscribe(&id).unwrap();
        assert!(dir.delete_session(&id));
        assert_eq!(rx.borrow().status, SessionStatus::Stopped);
        assert!(dir.get_session(&id).is_none());
    }

    #[test]
    fn test_start_outside_runtime_fails_the_session() {
        let tmp = tempfile::tempdir().unwrap();
        let (dir, mut events) = directory(tmp.path());
        let id = dir.create_session("watch_learn", &DatasetRef::Text(corpus()), &tiny(10, 5)).unwrap();

        assert!(!dir.start(&id));
        assert_eq!(dir.get_session(&id).unwrap().status, SessionStatus::Error);
        let names: Vec<String> = drain(&mut events).into_iter().map(|e| e.event).collect();
        assert_eq!(names, vec!["error".to_string()]);
    }
}
