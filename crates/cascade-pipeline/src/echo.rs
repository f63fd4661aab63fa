//! Deterministic stand-in shard for tests and the demo binary.
//!
//! Tokens are the prompt's raw bytes; embedding spreads each token across a
//! small hidden dimension; every applied layer nudges the activations by a
//! constant; generation appends a fixed suffix, truncated to the token
//! budget. End to end, prompt `"hello"` with the default suffix yields
//! `"hello world"`, convenient for eyeballing a multi-rank run.

use cascade_types::config::GenerationConfig;
use cascade_types::model::LayerRange;
use cascade_types::tensor::Tensor;

use crate::shard::{ComputeError, ModelShard};

const DEFAULT_HIDDEN_DIM: u64 = 16;
const DEFAULT_SUFFIX: &str = " world";

#[derive(Debug)]
pub struct EchoShard {
    total_layers: u32,
    hidden_dim: u64,
    suffix: String,
}

impl EchoShard {
    pub fn new(total_layers: u32) -> Self {
        Self {
            total_layers,
            hidden_dim: DEFAULT_HIDDEN_DIM,
            suffix: DEFAULT_SUFFIX.to_string(),
        }
    }

    /// Replace the generation suffix.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_hidden_dim(mut self, hidden_dim: u64) -> Self {
        self.hidden_dim = hidden_dim;
        self
    }
}

impl ModelShard for EchoShard {
    fn total_layers(&self) -> u32 {
        self.total_layers
    }

    fn tokenize(&self, text: &str) -> Result<Tensor, ComputeError> {
        let ids: Vec<i64> = text.bytes().map(i64::from).collect();
        Tensor::from_i64(vec![1, ids.len() as u64], ids)
            .map_err(|e| ComputeError::new(e.to_string()))
    }

    fn embed(&self, token_ids: &Tensor) -> Result<Tensor, ComputeError> {
        let ids = token_ids
            .as_i64()
            .ok_or_else(|| ComputeError::new("embed expects I64 token ids"))?;
        let mut values = Vec::with_capacity(ids.len() * self.hidden_dim as usize);
        for &id in ids {
            for d in 0..self.hidden_dim {
                values.push(id as f32 / 255.0 + d as f32 * 1e-3);
            }
        }
        Tensor::from_f32(vec![1, ids.len() as u64, self.hidden_dim], values)
            .map_err(|e| ComputeError::new(e.to_string()))
    }

    fn apply_layers(
        &self,
        activations: Tensor,
        range: LayerRange,
    ) -> Result<Tensor, ComputeError> {
        if range.end > self.total_layers {
            return Err(ComputeError::new(format!(
                "layer range {range} exceeds the model's {} layers",
                self.total_layers
            )));
        }
        let shape = activations.shape().to_vec();
        let mut values = activations
            .as_f32()
            .ok_or_else(|| ComputeError::new("apply_layers expects F32 activations"))?
            .to_vec();
        for x in &mut values {
            *x += range.len() as f32;
        }
        Tensor::from_f32(shape, values).map_err(|e| ComputeError::new(e.to_string()))
    }

    fn generate(
        &self,
        _activations: &Tensor,
        token_ids: &Tensor,
        config: &GenerationConfig,
    ) -> Result<Tensor, ComputeError> {
        let prompt = token_ids
            .as_i64()
            .ok_or_else(|| ComputeError::new("generate expects I64 token ids"))?;
        let mut ids = prompt.to_vec();
        let budget = config.max_new_tokens as usize;
        ids.extend(
            self.suffix
                .bytes()
                .take(budget)
                .map(i64::from),
        );
        Tensor::from_i64(vec![1, ids.len() as u64], ids)
            .map_err(|e| ComputeError::new(e.to_string()))
    }

    fn detokenize(&self, token_ids: &Tensor) -> Result<String, ComputeError> {
        let ids = token_ids
            .as_i64()
            .ok_or_else(|| ComputeError::new("detokenize expects I64 token ids"))?;
        let bytes: Vec<u8> = ids
            .iter()
            .map(|&id| {
                u8::try_from(id).map_err(|_| {
                    ComputeError::new(format!("token id {id} outside the byte vocabulary"))
                })
            })
            .collect::<Result<_, _>>()?;
        String::from_utf8(bytes).map_err(|e| ComputeError::new(e.to_string()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
