//! The model-shard collaborator seam.
//!
//! The pipeline core never performs forward-pass math. Each rank drives an
//! implementation of [`ModelShard`] that owns the local slice of the model;
//! weight loading, tokenizer vocabularies, and the decode loop all live
//! behind this trait. The core only moves tensors between the calls.

use cascade_types::config::GenerationConfig;
use cascade_types::model::LayerRange;
use cascade_types::tensor::Tensor;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Opaque failure inside the model runtime. Wrapped and propagated as fatal
/// for the run.
#[derive(Debug, thiserror::Error)]
#[error("model shard failure: {0}")]
pub struct ComputeError(pub String);

impl ComputeError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

// ── Trait ─────────────────────────────────────────────────────────────────────

/// One rank's view of the model.
///
/// Shape conventions (enforced by the wire protocol, produced here):
/// token ids are `[batch, seq]` `I64`; activations are
/// `[batch, seq, hidden]` `F32`. Layers outside the owned [`LayerRange`]
/// are the implementation's concern, typically parked on a default device
/// and never executed.
pub trait ModelShard: Send {
    /// Total transformer layer count of the full model.
    fn total_layers(&self) -> u32;

    /// Text → token ids. Called at rank 0 only.
    fn tokenize(&self, text: &str) -> Result<Tensor, ComputeError>;

    /// Token ids → embedded activations. Called at rank 0 only.
    fn embed(&self, token_ids: &Tensor) -> Result<Tensor, ComputeError>;

    /// Run the owned contiguous layer slice over the activations.
    fn apply_layers(&self, activations: Tensor, range: LayerRange)
        -> Result<Tensor, ComputeError>;

    /// Autoregressive decode at the final rank, bounded by
    /// `config.max_new_tokens`. Implementations may drive the loop from the
    /// processed activations, the prompt token ids, or both.
    fn generate(
        &self,
        activations: &Tensor,
        token_ids: &Tensor,
        config: &GenerationConfig,
    ) -> Result<Tensor, ComputeError>;

    /// Token ids → text. Called at the final rank only.
    fn detokenize(&self, token_ids: &Tensor) -> Result<String, ComputeError>;
}
