// ============================================================
// Layer 4 — Next-Token Batcher
// ============================================================
// Samples random contiguous windows from an encoded split and
// stacks them into (input, target) tensors.
//
// For a random offset o in [0, len - context_length):
//   input  = data[o     .. o + context_length]
//   target = data[o + 1 .. o + context_length + 1]
//
// The target is always the input shifted by exactly one
// position, i.e. standard next-token supervision.
//
// Tensors are built the same way for every backend: flatten
// every row into one Vec<i32>, make a 1D Int tensor with
// `from_ints`, then reshape to [batch_size, context_length].

use burn::prelude::*;
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorpusError {
    #[error(
        "dataset too short ({len} tokens) for context_length={context_length}; \
         need at least {} tokens",
        .context_length + 1
    )]
    OutOfData { len: usize, context_length: usize },
}

// ─── TokenBatch ───────────────────────────────────────────────────────────────
/// Row-major token windows, not yet on any device.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBatch {
    pub inputs:         Vec<u32>,
    pub targets:        Vec<u32>,
    pub batch_size:     usize,
    pub context_length: usize,
}

impl TokenBatch {
    pub fn input_row(&self, row: usize) -> &[u32] {
        let start = row * self.context_length;
        &self.inputs[start..start + self.context_length]
    }

    pub fn target_row(&self, row: usize) -> &[u32] {
        let start = row * self.context_length;
        &self.targets[start..start + self.context_length]
    }

    /// (inputs, targets), both shaped [batch_size, context_length].
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 2, Int>, Tensor<B, 2, Int>) {
        (
            ids_to_tensor(&self.inputs, self.batch_size, self.context_length, device),
            ids_to_tensor(&self.targets, self.batch_size, self.context_length, device),
        )
    }
}

pub fn ids_to_tensor<B: Backend>(
    ids:     &[u32],
    rows:    usize,
    cols:    usize,
    device:  &B::Device,
) -> Tensor<B, 2, Int> {
    let flat: Vec<i32> = ids.iter().map(|&x| x as i32).collect();
    Tensor::<B, 1, Int>::from_ints(flat.as_slice(), device).reshape([rows, cols])
}

/// Draw `batch_size` random windows from `data`.
pub fn sample_batch<R: Rng>(
    data:           &[u32],
    context_length: usize,
    batch_size:     usize,
    rng:            &mut R,
) -> Result<TokenBatch, CorpusError> {
    if data.len() <= context_length {
        return Err(CorpusError::OutOfData { len: data.len(), context_length });
    }
    let max_offset = data.len() - context_length;

    let mut inputs  = Vec::with_capacity(batch_size * context_length);
    let mut targets = Vec::with_capacity(batch_size * context_length);
    for _ in 0..batch_size {
        let o = rng.gen_range(0..max_offset);
        inputs.extend_from_slice(&data[o..o + context_length]);
        targets.extend_from_slice(&data[o + 1..o + context_length + 1]);
    }

    Ok(TokenBatch { inputs, targets, batch_size, context_length })
}
