// ============================================================
// Layer 5 — Causal Character Language Model
// ============================================================
// A small decoder-only transformer over a closed character
// vocabulary:
//
//   token_embedding (V×C) + position_embedding (T×C)
//       │
//       ▼
//   num_layers × Block
//       x = x + MultiHeadAttention(LayerNorm(x))
//       x = x + FeedForward(LayerNorm(x))
//       │
//       ▼
//   final LayerNorm → vocabulary logits
//
// Every head is its own module with bias-free query/key/value
// projections, so each (layer, head) owns exactly one attention
// matrix. A forward pass returns those matrices (post-softmax,
// pre-dropout) alongside the logits; the caller decides which
// pass is allowed to overwrite its captures.
//
// With weight tying the output projection is the transposed
// token-embedding table, so there is no separate lm_head.
//
// All linear and embedding weights start from N(0, 0.02).

use anyhow::{anyhow, Result};
use burn::{
    nn::{
        attention::generate_autoregressive_mask,
        loss::CrossEntropyLossConfig,
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        Initializer,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{relu, softmax},
};
use rand::{distributions::WeightedIndex, prelude::Distribution, Rng};

use crate::domain::config::ModelConfig;

const INIT_STD: f64 = 0.02;

fn initializer() -> Initializer {
    Initializer::Normal { mean: 0.0, std: INIT_STD }
}

fn linear<B: Backend>(d_input: usize, d_output: usize, device: &B::Device) -> Linear<B> {
    LinearConfig::new(d_input, d_output)
        .with_bias(false)
        .with_initializer(initializer())
        .init(device)
}

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct LanguageModelConfig {
    pub vocab_size:     usize,
    pub embedding_dim:  usize,
    pub num_layers:     usize,
    pub num_heads:      usize,
    pub context_length: usize,
    #[config(default = 0.0)]
    pub dropout:        f64,
    #[config(default = true)]
    pub weight_tying:   bool,
}

impl From<&ModelConfig> for LanguageModelConfig {
    fn from(c: &ModelConfig) -> Self {
        LanguageModelConfig::new(
            c.vocab_size, c.embedding_dim, c.num_layers, c.num_heads, c.context_length,
        )
        .with_dropout(c.dropout)
        .with_weight_tying(c.weight_tying)
    }
}

impl LanguageModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LanguageModel<B> {
        let token_embedding = EmbeddingConfig::new(self.vocab_size, self.embedding_dim)
            .with_initializer(initializer())
            .init(device);
        let position_embedding = EmbeddingConfig::new(self.context_length, self.embedding_dim)
            .with_initializer(initializer())
            .init(device);
        let blocks: Vec<Block<B>> = (0..self.num_layers)
            .map(|_| self.build_block(device))
            .collect();
        let final_norm = LayerNormConfig::new(self.embedding_dim).init(device);
        let lm_head    = (!self.weight_tying)
            .then(|| linear(self.embedding_dim, self.vocab_size, device));

        LanguageModel { token_embedding, position_embedding, blocks, final_norm, lm_head }
    }

    fn build_block<B: Backend>(&self, device: &B::Device) -> Block<B> {
        let c         = self.embedding_dim;
        let head_size = c / self.num_heads;
        let heads = (0..self.num_heads)
            .map(|_| Head {
                query:   linear(c, head_size, device),
                key:     linear(c, head_size, device),
                value:   linear(c, head_size, device),
                dropout: DropoutConfig::new(self.dropout).init(),
            })
            .collect();

        Block {
            norm1: LayerNormConfig::new(c).init(device),
            attention: MultiHeadAttention {
                heads,
                proj:    linear(c, c, device),
                dropout: DropoutConfig::new(self.dropout).init(),
            },
            norm2: LayerNormConfig::new(c).init(device),
            feed_forward: FeedForward {
                expand:   linear(c, 4 * c, device),
                contract: linear(4 * c, c, device),
                dropout:  DropoutConfig::new(self.dropout).init(),
            },
        }
    }
}

// ─── Head ─────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Head<B: Backend> {
    pub query:   Linear<B>,
    pub key:     Linear<B>,
    pub value:   Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> Head<B> {
    /// x: [batch, seq, C] → (out [batch, seq, head_size], weights [batch, seq, seq])
    pub fn forward(&self, x: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let [batch, seq, _] = x.dims();
        let q = self.query.forward(x.clone());
        let k = self.key.forward(x.clone());
        let v = self.value.forward(x);

        let head_size = q.dims()[2] as f64;
        let scores = q.matmul(k.swap_dims(1, 2)).mul_scalar(head_size.powf(-0.5));

        // true = strictly-future position
        let mask    = generate_autoregressive_mask::<B>(batch, seq, &scores.device());
        let scores  = scores.mask_fill(mask, f32::NEG_INFINITY);
        let weights = softmax(scores, 2);

        let out = self.dropout.forward(weights.clone()).matmul(v);
        (out, weights)
    }
}

// ─── MultiHeadAttention ───────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct MultiHeadAttention<B: Backend> {
    pub heads:   Vec<Head<B>>,
    pub proj:    Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> MultiHeadAttention<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> (Tensor<B, 3>, Vec<Tensor<B, 3>>) {
        let (outs, weights): (Vec<_>, Vec<_>) =
            self.heads.iter().map(|h| h.forward(x.clone())).unzip();
        let out = self.dropout.forward(self.proj.forward(Tensor::cat(outs, 2)));
        (out, weights)
    }
}

// ─── FeedForward ──────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    pub expand:   Linear<B>,
    pub contract: Linear<B>,
    pub dropout:  Dropout,
}

impl<B: Backend> FeedForward<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.dropout.forward(self.contract.forward(relu(self.expand.forward(x))))
    }
}

// ─── Block ────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Block<B: Backend> {
    pub norm1:        LayerNorm<B>,
    pub attention:    MultiHeadAttention<B>,
    pub norm2:        LayerNorm<B>,
    pub feed_forward: FeedForward<B>,
}

impl<B: Backend> Block<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> (Tensor<B, 3>, Vec<Tensor<B, 3>>) {
        let (attn_out, weights) = self.attention.forward(self.norm1.forward(x.clone()));
        let x = x + attn_out;
        let x = x.clone() + self.feed_forward.forward(self.norm2.forward(x));
        (x, weights)
    }
}

// ─── LanguageModel ────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct LanguageModel<B: Backend> {
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub blocks:             Vec<Block<B>>,
    pub final_norm:         LayerNorm<B>,
    pub lm_head:            Option<Linear<B>>,
}

pub struct ModelOutput<B: Backend> {
    /// [batch, seq, vocab]
    pub logits:    Tensor<B, 3>,
    /// Mean cross-entropy over every position, when targets were given.
    pub loss:      Option<Tensor<B, 1>>,
    /// attention[layer][head]: [batch, seq, seq]
    pub attention: Vec<Vec<Tensor<B, 3>>>,
}

impl<B: Backend> LanguageModel<B> {
    pub fn context_length(&self) -> usize {
        self.position_embedding.weight.val().dims()[0]
    }

    pub fn vocab_size(&self) -> usize {
        self.token_embedding.weight.val().dims()[0]
    }

    pub fn device(&self) -> B::Device {
        self.token_embedding.weight.val().device()
    }

    /// tokens: [batch, seq] with seq ≤ context_length.
    pub fn forward(&self, tokens: Tensor<B, 2, Int>, targets: Option<Tensor<B, 2, Int>>) -> ModelOutput<B> {
        let [batch, seq] = tokens.dims();
        assert!(
            seq <= self.context_length(),
            "sequence length {seq} exceeds context length {}",
            self.context_length()
        );

        let tok_emb = self.token_embedding.forward(tokens);
        let positions = Tensor::<B, 1, Int>::arange(0..seq as i64, &tok_emb.device())
            .unsqueeze::<2>()
            .expand([batch, seq]);
        let pos_emb = self.position_embedding.forward(positions);

        let mut x = tok_emb + pos_emb;
        let mut attention = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let (out, weights) = block.forward(x);
            x = out;
            attention.push(weights);
        }
        let x = self.final_norm.forward(x); // [batch, seq, C]

        let logits = match &self.lm_head {
            Some(head) => head.forward(x),
            None => {
                let [b, t, c] = x.dims();
                let table = self.token_embedding.weight.val(); // [V, C]
                let vocab = table.dims()[0];
                x.reshape([b * t, c]).matmul(table.transpose()).reshape([b, t, vocab])
            }
        };

        let loss = targets.map(|targets| {
            let [b, t, v] = logits.dims();
            CrossEntropyLossConfig::new()
                .init(&logits.device())
                .forward(logits.clone().reshape([b * t, v]), targets.reshape([b * t]))
        });

        ModelOutput { logits, loss, attention }
    }

    /// Softmax over the vocabulary for the token following `context`.
    /// The context is cropped to the last `context_length` ids; an
    /// empty context is seeded with id 0.
    pub fn next_token_probabilities(&self, context: &[u32], temperature: f64) -> Result<Vec<f32>> {
        let ctx_len = self.context_length();
        let window: Vec<i32> = if context.is_empty() {
            vec![0]
        } else {
            context[context.len().saturating_sub(ctx_len)..]
                .iter()
                .map(|&x| x as i32)
                .collect()
        };
        let seq    = window.len();
        let device = self.device();
        let tokens = Tensor::<B, 1, Int>::from_ints(window.as_slice(), &device).reshape([1, seq]);

        let logits = self.forward(tokens, None).logits;
        let vocab  = logits.dims()[2];
        let last   = logits.slice([0..1, seq - 1..seq, 0..vocab]).reshape([vocab]);
        let last   = if temperature > 0.0 { last.div_scalar(temperature) } else { last };

        softmax(last, 0)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow!("cannot read probabilities: {e:?}"))
    }

    /// Autoregressive sampling; returns the seed followed by `steps`
    /// new ids. Temperature ≤ 0 picks the arg-max every step.
    pub fn generate<R: Rng>(
        &self,
        seed:        &[u32],
        steps:       usize,
        temperature: f64,
        rng:         &mut R,
    ) -> Result<Vec<u32>> {
        let mut ids = if seed.is_empty() { vec![0] } else { seed.to_vec() };
        for _ in 0..steps {
            let probs = self.next_token_probabilities(&ids, temperature)?;
            ids.push(sample_index(&probs, temperature, rng));
        }
        Ok(ids)
    }
}

/// Draw one index from a categorical distribution.
pub fn sample_index<R: Rng>(probs: &[f32], temperature: f64, rng: &mut R) -> u32 {
    if temperature > 0.0 {
        if let Ok(dist) = WeightedIndex::new(probs) {
            return dist.sample(rng) as u32;
        }
    }
    argmax(probs)
}

pub fn argmax(values: &[f32]) -> u32 {
    values
        .iter()
        .enumerate()
        .fold((0usize, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0 as u32
}

/// First sequence of a [batch, seq, seq] attention tensor as rows.
pub fn first_matrix<B: Backend>(weights: Tensor<B, 3>) -> Result<Vec<Vec<f32>>> {
    let [_, seq, _] = weights.dims();
    let flat = weights
        .slice([0..1, 0..seq, 0..seq])
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("cannot read attention weights: {e:?}"))?;
    Ok(flat.chunks(seq.max(1)).map(<[f32]>::to_vec).collect())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use rand::{rngs::StdRng, SeedableRng};

    type TestBackend = NdArray;

    fn tiny(weight_tying: bool) -> LanguageModel<TestBackend> {
        LanguageModelConfig::new(11, 16, 2, 4, 8)
            .with_weight_tying(weight_tying)
            .init(&Default::default())
    }

    fn tokens(ids: &[i32], batch: usize) -> Tensor<TestBackend, 2, Int> {
        let seq = ids.len() / batch;
        Tensor::<TestBackend, 1, Int>::from_ints(ids, &Default::default()).reshape([batch, seq])
    }

    #[test]
    fn test_forward_shape() {
        for tying in [true, false] {
            let model = tiny(tying);
            let out = model.forward(tokens(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10], 2), None);
            assert_eq!(out.logits.dims(), [2, 5, 11]);
            assert!(out.loss.is_none());
            assert_eq!(out.attention.len(), 2);
            assert_eq!(out.attention[0].len(), 4);
            assert_eq!(out.attention[1][3].dims(), [2, 5, 5]);
        }
    }

    #[test]
    fn test_weight_tying_drops_lm_head() {
        assert!(tiny(true).lm_head.is_none());
        assert!(tiny(false).lm_head.is_some());
    }

    #[test]
    fn test_loss_is_near_uniform_at_init() {
        let model = tiny(true);
        let out = model.forward(
            tokens(&[1, 2, 3, 4, 5, 6, 7, 8], 2),
            Some(tokens(&[2, 3, 4, 5, 6, 7, 8, 9], 2)),
        );
        let loss: f64 = out.loss.unwrap().into_scalar().elem::<f64>();
        // ln(11) ≈ 2.398; small init keeps logits close to flat.
        assert!((loss - 11f64.ln()).abs() < 0.5, "loss = {loss}");
    }

    #[test]
    fn test_causal_masking() {
        let model = tiny(false);
        let a = model.forward(tokens(&[1, 2, 3, 4, 5, 6], 1), None).logits;
        let b = model.forward(tokens(&[1, 2, 3, 9, 5, 6], 1), None).logits;

        let prefix_a = a.clone().slice([0..1, 0..3, 0..11]).into_data().to_vec::<f32>().unwrap();
        let prefix_b = b.clone().slice([0..1, 0..3, 0..11]).into_data().to_vec::<f32>().unwrap();
        for (x, y) in prefix_a.iter().zip(&prefix_b) {
            assert!((x - y).abs() < 1e-6);
        }

        let at_a = a.slice([0..1, 3..4, 0..11]).into_data().to_vec::<f32>().unwrap();
        let at_b = b.slice([0..1, 3..4, 0..11]).into_data().to_vec::<f32>().unwrap();
        assert!(at_a.iter().zip(&at_b).any(|(x, y)| (x - y).abs() > 1e-7));
    }

    #[test]
    fn test_attention_rows_are_causal_distributions() {
        let model = tiny(true);
        let out = model.forward(tokens(&[3, 1, 4, 1, 5], 1), None);
        let matrix = first_matrix(out.attention[0][0].clone()).unwrap();
        assert_eq!(matrix.len(), 5);
        for (t, row) in matrix.iter().enumerate() {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
            assert!(row[t + 1..].iter().all(|&w| w == 0.0));
        }
    }

    #[test]
    #[should_panic]
    fn test_sequence_longer_than_context_panics() {
        let model = tiny(true);
        let ids: Vec<i32> = (0..9).collect();
        model.forward(tokens(&ids, 1), None);
    }

    #[test]
    fn test_generate_extends_and_crops() {
        let model = tiny(true);
        let mut rng = StdRng::seed_from_u64(3);
        let seed: Vec<u32> = (0..10).collect();
        let out = model.generate(&seed, 12, 1.0, &mut rng).unwrap();
        assert_eq!(out.len(), 22);
        assert_eq!(&out[..10], &seed[..]);
        assert!(out.iter().all(|&i| i < 11));
    }

    #[test]
    fn test_zero_temperature_is_greedy() {
        let model = tiny(true);
        let mut rng = StdRng::seed_from_u64(9);
        let a = model.generate(&[1, 2], 5, 0.0, &mut rng).unwrap();
        let b = model.generate(&[1, 2], 5, 0.0, &mut rng).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_next_token_probabilities_sum_to_one() {
        let model = tiny(true);
        let probs = model.next_token_probabilities(&[], 0.8).unwrap();
        assert_eq!(probs.len(), 11);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
    }
}
