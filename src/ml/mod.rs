// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn framework code lives here (plus the tensor helpers in
// data/batcher.rs). No other layer builds modules, optimisers or
// records directly.
//
//   model.rs    — the causal character transformer:
//                 • token + position embeddings
//                 • per-head causal self-attention (ReLU FFN,
//                   pre-norm blocks, residual connections)
//                 • optional tied output projection
//                 • sampling-based generation
//
//   trainer.rs  — the numeric procedures the Training Loop calls:
//                 warmup + cosine learning rate, Adam step with
//                 gradient-norm clipping, loss estimation,
//                 attention capture, state export / restore
//
// Reference: Vaswani et al. (2017) Attention Is All You Need
//            Radford et al. (2019) GPT-2

/// Causal character language model
pub mod model;

/// Gradient step, loss estimation and model-state handling
pub mod trainer;
