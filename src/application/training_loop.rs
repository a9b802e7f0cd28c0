// ============================================================
// Layer 2 — Training Loop
// ============================================================
// The long-lived task behind one session. Spawned exactly once,
// on the session's first accepted `start`.
//
// Setup (blocking pool):
//   load corpus → prepare vocabulary + split → build model
//   Each stage has its own error_type on failure:
//     dataset_load_error, dataset_prepare_error, model_init_error
//
// Per iteration, while current_step < max_steps:
//   1. Paused       → wait on the control channel (no polling);
//                     a one-shot step wakes it for one iteration
//   2. Stopped/Error→ return, no further mutation
//   3. current_step += 1
//   4. learning rate from the warmup + cosine schedule
//   5. one batch: forward, backward, clipped Adam update
//   6. on step 1 and every eval_interval steps:
//        train / val loss estimate → training_metrics
//        sample from an empty seed → generated_sample
//        no-grad pass on one example → attention_snapshot × heads
//   7. yield ∝ 1 / speed, or a bare yield above the threshold
//
// Numeric work runs on tokio's blocking pool; the task itself
// only awaits, so other sessions and control requests proceed.
// A stop takes effect at the next iteration boundary.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rand::{rngs::StdRng, SeedableRng};
use std::{sync::Arc, time::Duration};

use crate::application::{
    session::{lock, TrainingSession},
    settings::EngineSettings,
};
use crate::data::{
    batcher::{sample_batch, CorpusError},
    dataset::TokenCorpus,
    loader::CorpusLoader,
};
use crate::domain::{
    events::{round4, TrainingEvent},
    records::{LossRecord, SampleRecord},
    session::SessionStatus,
};
use crate::infra::metrics::MetricsChannel;
use crate::ml::trainer::{build_runner, learning_rate_at, AttentionMatrix};

/// Everything a loop invocation needs besides the session itself.
#[derive(Clone)]
pub struct LoopContext {
    pub settings: EngineSettings,
    pub channel:  MetricsChannel,
    pub loader:   CorpusLoader,
}

struct Fault {
    error_type: &'static str,
    message:    String,
}

impl Fault {
    fn new(error_type: &'static str, err: anyhow::Error) -> Self {
        Self { error_type, message: format!("{err:#}") }
    }
}

/// What one evaluation produced.
struct Evaluation {
    train_loss: f64,
    val_loss:   f64,
    sample:     String,
    attention:  Vec<AttentionMatrix>,
    tokens:     Vec<String>,
}

enum Gate {
    Proceed { one_shot: bool },
    Exit,
}

// ─── Entry point ──────────────────────────────────────────────────────────────
pub async fn run(session: Arc<TrainingSession>, ctx: LoopContext) {
    tracing::info!("Training loop started for session {}", session.id);

    let corpus = {
        let (task_session, task_ctx) = (session.clone(), ctx.clone());
        match tokio::task::spawn_blocking(move || setup(&task_session, &task_ctx)).await {
            Ok(Ok(corpus)) => Arc::new(corpus),
            Ok(Err(fault)) => return fail(&session, &ctx, fault),
            Err(join)      => {
                let fault = Fault::new("model_init_error", anyhow!("setup task failed: {join}"));
                return fail(&session, &ctx, fault);
            }
        }
    };

    let mut rng = match ctx.settings.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None       => StdRng::from_entropy(),
    };

    let cfg = lock(&session.state).training_config.clone();

    for step_index in 0..cfg.max_steps {
        // ── 1–2. pause / stop gate ───────────────────────────────────────────
        let one_shot = match gate(&session).await {
            Gate::Proceed { one_shot } => one_shot,
            Gate::Exit => {
                tracing::info!("Session {} left the loop at step {}", session.id, step_index);
                return;
            }
        };

        // ── 3–4. step counter and learning rate ─────────────────────────────
        let step = step_index + 1;
        lock(&session.state).current_step = step;
        let lr       = learning_rate_at(step_index, cfg.warmup_steps, cfg.max_steps, cfg.learning_rate);
        let evaluate = step % cfg.eval_interval == 0 || step_index == 0;

        // ── 5–6. compute on the blocking pool ───────────────────────────────
        let outcome = {
            let task_session  = session.clone();
            let task_corpus   = corpus.clone();
            let task_settings = ctx.settings.clone();
            let mut rng_moved = rng;
            let handle = tokio::task::spawn_blocking(move || {
                let result = iterate(&task_session, &task_corpus, &task_settings, &mut rng_moved, lr, evaluate);
                (rng_moved, result)
            });
            match handle.await {
                Ok((returned, result)) => {
                    rng = returned;
                    result
                }
                Err(join) => {
                    let fault = Fault::new("training_step_error", anyhow!("training step failed: {join}"));
                    return fail(&session, &ctx, fault);
                }
            }
        };

        match outcome {
            Ok(Some(eval)) => publish_evaluation(&session, &ctx, step, eval),
            Ok(None)       => {}
            Err(err)       => return fail(&session, &ctx, Fault::new("training_step_error", err)),
        }

        if one_shot && session.control.send_if_modified(|s| s.repause()) {
            tracing::debug!("Session {} re-paused after one-shot step {}", session.id, step);
        }

        // ── 7. speed-proportional yield ─────────────────────────────────────
        pace(&session, &ctx.settings).await;
    }

    complete(&session, &ctx);
}

// ─── Setup ────────────────────────────────────────────────────────────────────
fn setup(session: &TrainingSession, ctx: &LoopContext) -> Result<TokenCorpus, Fault> {
    let (source, model_cfg_ctx) = {
        let state = lock(&session.state);
        (state.source.clone(), state.model_config.context_length)
    };

    let text = ctx.loader
        .load(&source)
        .map_err(|e| Fault::new("dataset_load_error", e))?;

    let warm       = lock(&session.warm_start).take();
    let vocabulary = warm.as_ref().map(|w| w.vocabulary.clone());
    let corpus     = TokenCorpus::prepare(&text, vocabulary, ctx.settings.val_fraction);

    for split in [&corpus.train, &corpus.val] {
        if split.len() <= model_cfg_ctx {
            let err = CorpusError::OutOfData { len: split.len(), context_length: model_cfg_ctx };
            return Err(Fault::new("dataset_prepare_error", err.into()));
        }
    }

    let (model_cfg, train_cfg) = {
        let mut state = lock(&session.state);
        if warm.is_none() {
            state.model_config.vocab_size = corpus.vocabulary.len();
        }
        state.vocabulary   = Some(corpus.vocabulary.clone());
        state.corpus_stats = Some(corpus.stats);
        (state.model_config.clone(), state.training_config.clone())
    };
    tracing::info!(
        "Session {}: corpus ready ({} chars, vocab {}, {} train / {} val tokens)",
        session.id, corpus.stats.char_count, corpus.vocabulary.len(), corpus.train.len(), corpus.val.len(),
    );

    let runner = build_runner(
        &model_cfg,
        &train_cfg,
        ctx.settings.eval_iters,
        warm.as_ref().map(|w| &w.state),
    )
    .map_err(|e| Fault::new("model_init_error", e))?;
    *lock(&session.runner) = Some(runner);

    Ok(corpus)
}

// ─── One iteration ────────────────────────────────────────────────────────────
fn iterate(
    session:  &TrainingSession,
    corpus:   &TokenCorpus,
    settings: &EngineSettings,
    rng:      &mut StdRng,
    lr:       f64,
    evaluate: bool,
) -> Result<Option<Evaluation>> {
    let (context_length, batch_size) = {
        let state = lock(&session.state);
        (state.model_config.context_length, state.training_config.batch_size)
    };

    let mut slot   = lock(&session.runner);
    let runner     = slot.as_mut().context("model is not initialised")?;

    let batch = sample_batch(&corpus.train, context_length, batch_size, rng)?;
    let loss  = runner.train_step(&batch, lr)?;
    tracing::trace!("Session {}: batch loss {:.4} at lr {:.2e}", session.id, loss, lr);

    if !evaluate {
        return Ok(None);
    }

    let train_loss = runner.estimate_loss(&corpus.train, rng)?;
    let val_loss   = runner.estimate_loss(&corpus.val, rng)?;

    let sample_ids = runner.generate(&[], settings.sample_tokens, settings.sample_temperature, rng)?;
    let sample     = corpus.vocabulary.decode(&sample_ids);

    runner.refresh_attention(&batch)?;
    let attention = runner.extract_attention()?;
    let tokens    = corpus.vocabulary.labels(batch.input_row(0));

    Ok(Some(Evaluation { train_loss, val_loss, sample, attention, tokens }))
}

fn publish_evaluation(session: &TrainingSession, ctx: &LoopContext, step: usize, eval: Evaluation) {
    {
        let mut state = lock(&session.state);
        state.loss_history.push(LossRecord {
            step,
            train_loss: round4(eval.train_loss),
            val_loss:   round4(eval.val_loss),
        });
        state.samples.push(SampleRecord { step, text: eval.sample.clone(), prompt: String::new() });
    }
    tracing::info!(
        "Session {} step {:>5} | train_loss={:.4} | val_loss={:.4}",
        session.id, step, eval.train_loss, eval.val_loss,
    );

    let channel = &ctx.channel;
    channel.emit(&session.id, &TrainingEvent::Metrics {
        step,
        train_loss: eval.train_loss,
        val_loss:   eval.val_loss,
    });
    channel.emit(&session.id, &TrainingEvent::Sample {
        step,
        text:   eval.sample,
        prompt: String::new(),
    });

    let mut dropped = 0usize;
    for snap in eval.attention {
        let sent = channel.emit(&session.id, &TrainingEvent::Attention {
            step,
            layer:  snap.layer,
            head:   snap.head,
            matrix: snap.matrix,
            tokens: eval.tokens.clone(),
        });
        if !sent {
            dropped += 1;
        }
    }
    if dropped > 0 {
        tracing::trace!("Session {}: {} attention snapshots throttled", session.id, dropped);
    }
}

// ─── Control gate ─────────────────────────────────────────────────────────────
async fn gate(session: &TrainingSession) -> Gate {
    let mut rx = session.subscribe();
    loop {
        let status = rx.borrow_and_update().status;
        match status {
            SessionStatus::Running => {
                let one_shot = session.control.send_if_modified(|s| s.take_step_once());
                return Gate::Proceed { one_shot };
            }
            SessionStatus::Paused | SessionStatus::Idle => {
                if rx.changed().await.is_err() {
                    return Gate::Exit;
                }
            }
            SessionStatus::Stopped | SessionStatus::Completed | SessionStatus::Error => {
                return Gate::Exit;
            }
        }
    }
}

async fn pace(session: &TrainingSession, settings: &EngineSettings) {
    let speed = session.control.borrow().speed_multiplier;
    match pace_delay(speed, settings) {
        Some(delay) => tokio::time::sleep(delay).await,
        None        => tokio::task::yield_now().await,
    }
}

/// Sleep between iterations for `speed`; `None` at or above the
/// no-sleep threshold.
fn pace_delay(speed: f64, settings: &EngineSettings) -> Option<Duration> {
    let speed = speed.max(settings.min_speed);
    if speed >= settings.max_speed_threshold {
        return None;
    }
    let secs = settings.base_yield_ms / 1000.0 / speed;
    Some(Duration::from_secs_f64(secs.max(0.0)))
}

// ─── Terminal transitions ─────────────────────────────────────────────────────
fn complete(session: &TrainingSession, ctx: &LoopContext) {
    if !session.control.send_if_modified(|s| s.complete()) {
        tracing::info!("Session {} finished its last step after being {}", session.id, session.status());
        return;
    }

    let event = {
        let mut state = lock(&session.state);
        state.completed_at = Some(Utc::now());
        let last = state.loss_history.last();
        TrainingEvent::Completed {
            final_train_loss:   last.map(|r| r.train_loss),
            final_val_loss:     last.map(|r| r.val_loss),
            total_time_seconds: state
                .started_clock
                .map(|t| (t.elapsed().as_secs_f64() * 100.0).round() / 100.0),
        }
    };

    tracing::info!("Session {} completed", session.id);
    ctx.channel.emit(&session.id, &event);
}

fn fail(session: &TrainingSession, ctx: &LoopContext, fault: Fault) {
    if !session.control.send_if_modified(|s| s.fail()) {
        tracing::warn!(
            "Session {} hit {} after reaching {}: {}",
            session.id, fault.error_type, session.status(), fault.message,
        );
        return;
    }

    lock(&session.state).error_message = Some(fault.message.clone());
    tracing::error!("Session {} failed ({}): {}", session.id, fault.error_type, fault.message);
    ctx.channel.emit(&session.id, &TrainingEvent::Error {
        error_type: fault.error_type.to_string(),
        message:    fault.message,
    });
}
