// ============================================================
// Layer 5 — Gradient Step, Loss Estimation, Introspection
// ============================================================
// Owns one session's model and Adam optimiser and exposes the
// numeric procedures the Training Loop schedules:
//
//   train_step         forward + backward + (clipped) Adam update
//   estimate_loss      averaged no-grad loss over random batches
//   refresh_attention  one no-grad pass on a single example
//   extract_attention  last captured matrix per (layer, head)
//   generate / next_token_probabilities
//   export_state       model + optimiser records as bytes
//
// Key Burn insight:
//   - Training uses TrainingBackend (Autodiff<NdArray>) for gradients
//   - model.valid() returns the model on the inner backend, which
//     has no autodiff graph and no dropout: that is eval mode
//   - Attention captures are stored on the inner backend
//
// The optimiser's concrete type is never named outside this
// file. Everything else talks to a `Box<dyn ModelRunner>`.
//
// Reference: Kingma & Ba (2015) Adam

use anyhow::{anyhow, bail, Context, Result};
use burn::{
    module::{AutodiffModule, ModuleVisitor, Param},
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::AutodiffBackend,
};
use rand::rngs::StdRng;
use std::marker::PhantomData;

use crate::data::batcher::{ids_to_tensor, sample_batch, TokenBatch};
use crate::domain::config::{ModelConfig, TrainingConfig};
use crate::ml::model::{first_matrix, LanguageModel, LanguageModelConfig};

#[cfg(not(feature = "wgpu"))]
pub type TrainingBackend = burn::backend::Autodiff<burn::backend::NdArray>;
#[cfg(feature = "wgpu")]
pub type TrainingBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

type StateRecorder = BinBytesRecorder<FullPrecisionSettings>;

// ─── Learning-rate schedule ──────────────────────────────────────────────────
/// Linear warmup, then cosine decay from `base` down to `base / 10`.
/// `step` is the 0-based index of the update being made.
pub fn learning_rate_at(step: usize, warmup: usize, total: usize, base: f64) -> f64 {
    let floor = base / 10.0;
    if step < warmup {
        return base * (step + 1) as f64 / warmup as f64;
    }
    if step >= total {
        return floor;
    }
    let progress = (step - warmup) as f64 / total.saturating_sub(warmup).max(1) as f64;
    let cosine   = 0.5 * (1.0 + (std::f64::consts::PI * progress).cos());
    floor + cosine * (base - floor)
}

// ─── Public surface ───────────────────────────────────────────────────────────
/// Serialized model and optimiser records.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelState {
    pub model:     Vec<u8>,
    pub optimizer: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttentionMatrix {
    pub layer:  usize,
    pub head:   usize,
    pub matrix: Vec<Vec<f32>>,
}

pub trait ModelRunner: Send {
    /// One gradient update; returns the batch loss.
    fn train_step(&mut self, batch: &TokenBatch, learning_rate: f64) -> Result<f64>;

    fn estimate_loss(&self, data: &[u32], rng: &mut StdRng) -> Result<f64>;

    /// Overwrite attention captures from a no-grad pass on the first
    /// sequence of `batch`.
    fn refresh_attention(&mut self, batch: &TokenBatch) -> Result<()>;

    fn extract_attention(&self) -> Result<Vec<AttentionMatrix>>;

    fn generate(&self, seed: &[u32], steps: usize, temperature: f64, rng: &mut StdRng) -> Result<Vec<u32>>;

    fn next_token_probabilities(&self, context: &[u32], temperature: f64) -> Result<Vec<f32>>;

    fn export_state(&self) -> Result<ModelState>;
}

/// Build a fresh (or restored) runner on the default device.
pub fn build_runner(
    model_cfg:  &ModelConfig,
    train_cfg:  &TrainingConfig,
    eval_iters: usize,
    restore:    Option<&ModelState>,
) -> Result<Box<dyn ModelRunner>> {
    let device = <TrainingBackend as Backend>::Device::default();
    tracing::debug!("Using device: {:?}", device);
    let trainer = new_trainer::<TrainingBackend>(model_cfg, train_cfg, eval_iters, restore, device)?;
    Ok(Box::new(trainer))
}

// ─── Trainer ──────────────────────────────────────────────────────────────────
pub struct Trainer<B: AutodiffBackend, O> {
    model:          LanguageModel<B>,
    optim:          O,
    device:         B::Device,
    batch_size:     usize,
    context_length: usize,
    eval_iters:     usize,
    /// Global gradient-norm ceiling; 0 disables clipping
    grad_clip:      f64,
    /// captures[layer][head]: [1, seq, seq]; empty until the first pass
    captures:       Vec<Vec<Tensor<B::InnerBackend, 3>>>,
}

pub fn new_trainer<B: AutodiffBackend>(
    model_cfg:  &ModelConfig,
    train_cfg:  &TrainingConfig,
    eval_iters: usize,
    restore:    Option<&ModelState>,
    device:     B::Device,
) -> Result<Trainer<B, impl Optimizer<LanguageModel<B>, B>>> {
    let mut model: LanguageModel<B> = LanguageModelConfig::from(model_cfg).init(&device);

    // m = β1*m + (1-β1)*g        (mean)
    // v = β2*v + (1-β2)*g²       (variance)
    // θ = θ - lr * m / (√v + ε)  (update)
    // Clipping is applied to the global norm in `train_step`, not here.
    let mut optim = AdamConfig::new()
        .with_epsilon(1e-8)
        .init::<B, LanguageModel<B>>();

    if let Some(state) = restore {
        let recorder = StateRecorder::default();
        let model_record = <StateRecorder as Recorder<B>>::load(&recorder, state.model.clone(), &device)
            .map_err(|e| anyhow!("cannot restore model weights: {e:?}"))?;
        model = model.load_record(model_record);

        let optim_record = <StateRecorder as Recorder<B>>::load(&recorder, state.optimizer.clone(), &device)
            .map_err(|e| anyhow!("cannot restore optimizer state: {e:?}"))?;
        optim = optim.load_record(optim_record);
        tracing::info!("Restored model and optimizer state");
    }

    tracing::info!(
        "Model ready: {} layers, {} heads of size {}, embedding_dim={}, vocab={}",
        model_cfg.num_layers, model_cfg.num_heads, model_cfg.head_size(), model_cfg.embedding_dim, model.vocab_size(),
    );

    Ok(Trainer {
        model,
        optim,
        device,
        batch_size:     train_cfg.batch_size,
        context_length: model_cfg.context_length,
        eval_iters:     eval_iters.max(1),
        grad_clip:      train_cfg.grad_clip,
        captures:       Vec::new(),
    })
}

impl<B, O> ModelRunner for Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<LanguageModel<B>, B>,
{
    fn train_step(&mut self, batch: &TokenBatch, learning_rate: f64) -> Result<f64> {
        let (x, y) = batch.to_tensors::<B>(&self.device);
        let out    = self.model.forward(x, Some(y));
        let loss   = out.loss.context("forward pass produced no loss")?;

        let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
        if !loss_val.is_finite() {
            bail!("non-finite training loss ({loss_val})");
        }

        self.captures = out
            .attention
            .into_iter()
            .map(|heads| heads.into_iter().map(|w| first_only(w).inner()).collect())
            .collect();

        // Backward pass + Adam update
        let grads = loss.backward();
        let mut grads = GradientsParams::from_grads(grads, &self.model);
        if self.grad_clip > 0.0 {
            let norm = clip_global_norm::<B, _>(&self.model, &mut grads, self.grad_clip);
            tracing::trace!("gradient norm {:.4} (clip {})", norm, self.grad_clip);
        }
        self.model = self.optim.step(learning_rate, self.model.clone(), grads);

        Ok(loss_val)
    }

    fn estimate_loss(&self, data: &[u32], rng: &mut StdRng) -> Result<f64> {
        let model  = self.model.valid();
        let device = model.device();

        let available = data.len().saturating_sub(self.context_length) / self.batch_size;
        let iters     = self.eval_iters.min(available.max(1));

        let mut total = 0.0f64;
        for _ in 0..iters {
            let batch  = sample_batch(data, self.context_length, self.batch_size, rng)?;
            let (x, y) = batch.to_tensors::<B::InnerBackend>(&device);
            let loss   = model.forward(x, Some(y)).loss.context("forward pass produced no loss")?;
            total += loss.into_scalar().elem::<f64>();
        }
        Ok(total / iters as f64)
    }

    fn refresh_attention(&mut self, batch: &TokenBatch) -> Result<()> {
        let model  = self.model.valid();
        let device = model.device();
        let x      = ids_to_tensor::<B::InnerBackend>(batch.input_row(0), 1, batch.context_length, &device);

        self.captures = model.forward(x, None).attention;
        Ok(())
    }

    fn extract_attention(&self) -> Result<Vec<AttentionMatrix>> {
        let mut out = Vec::new();
        for (layer, heads) in self.captures.iter().enumerate() {
            for (head, weights) in heads.iter().enumerate() {
                out.push(AttentionMatrix { layer, head, matrix: first_matrix(weights.clone())? });
            }
        }
        Ok(out)
    }

    fn generate(&self, seed: &[u32], steps: usize, temperature: f64, rng: &mut StdRng) -> Result<Vec<u32>> {
        self.model.valid().generate(seed, steps, temperature, rng)
    }

    fn next_token_probabilities(&self, context: &[u32], temperature: f64) -> Result<Vec<f32>> {
        self.model.valid().next_token_probabilities(context, temperature)
    }

    fn export_state(&self) -> Result<ModelState> {
        let recorder = StateRecorder::default();
        let model = <StateRecorder as Recorder<B>>::record(&recorder, self.model.clone().into_record(), ())
            .map_err(|e| anyhow!("cannot serialize model weights: {e:?}"))?;
        let optimizer = <StateRecorder as Recorder<B>>::record(&recorder, self.optim.to_record(), ())
            .map_err(|e| anyhow!("cannot serialize optimizer state: {e:?}"))?;
        Ok(ModelState { model, optimizer })
    }
}

// ─── Global-norm gradient clipping ────────────────────────────────────────────
// g ← g · min(1, max_norm / (‖g‖₂ + 1e-6)), with ‖g‖₂ taken over
// every parameter of the model at once.

struct SquaredNorm<'a, B> {
    grads: &'a GradientsParams,
    total: f64,
    _b:    PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredNorm<'_, B> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(g) = self.grads.get::<B::InnerBackend, D>(param.id) {
            self.total += (g.clone() * g).sum().into_scalar().elem::<f64>();
        }
    }
}

struct ScaleGrads<'a, B> {
    grads: &'a mut GradientsParams,
    scale: f64,
    _b:    PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for ScaleGrads<'_, B> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(g) = self.grads.remove::<B::InnerBackend, D>(param.id) {
            self.grads.register::<B::InnerBackend, D>(param.id, g.mul_scalar(self.scale));
        }
    }
}

/// L2 norm of all gradients of `model`, taken as one vector.
pub fn global_grad_norm<B: AutodiffBackend, M: AutodiffModule<B>>(model: &M, grads: &GradientsParams) -> f64 {
    let mut visitor = SquaredNorm::<B> { grads, total: 0.0, _b: PhantomData };
    model.visit(&mut visitor);
    visitor.total.sqrt()
}

/// Rescale every gradient so the global norm is at most `max_norm`.
/// Returns the norm before clipping.
pub fn clip_global_norm<B: AutodiffBackend, M: AutodiffModule<B>>(
    model:    &M,
    grads:    &mut GradientsParams,
    max_norm: f64,
) -> f64 {
    let norm  = global_grad_norm::<B, M>(model, grads);
    let scale = max_norm / (norm + 1e-6);
    if scale < 1.0 {
        let mut visitor = ScaleGrads::<B> { grads, scale, _b: PhantomData };
        model.visit(&mut visitor);
    }
    norm
}

fn first_only<B: Backend>(weights: Tensor<B, 3>) -> Tensor<B, 3> {
    let [_, seq, _] = weights.dims();
    weights.slice([0..1, 0..seq, 0..seq])
}
