use cascade_net::TransportError;
use cascade_types::error::ConfigError;

use crate::shard::ComputeError;
use crate::text::EncodingError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid rank/world-size/partition. Raised before any transport
    /// activity.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Channel closed, shape disagreement, peer crash. Fatal to the run.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The final rank produced bytes rank 0 cannot decode. Fatal to the
    /// request, never to the process.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Opaque failure inside the model-shard collaborator.
    #[error("compute error: {0}")]
    Compute(#[from] ComputeError),

    /// External interrupt before the run finished.
    #[error("pipeline run interrupted")]
    Interrupted,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
