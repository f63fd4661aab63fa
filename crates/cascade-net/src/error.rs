use cascade_types::tensor::TensorError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel to rank {rank} closed mid-transfer")]
    Closed { rank: u32 },

    #[error("frame of {len} bytes exceeds the {max}-byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("shape frame carries {got} bytes, expected {expected} for {ndim} dims")]
    ShapeFrameMismatch {
        ndim: usize,
        expected: usize,
        got: usize,
    },

    #[error("declared shape contains invalid dimension {0}")]
    InvalidDimension(i64),

    #[error("payload of {got} bytes disagrees with declared shape {shape:?} ({expected} bytes)")]
    PayloadMismatch {
        shape: Vec<u64>,
        expected: u64,
        got: usize,
    },

    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),

    #[error("no link to rank {0}")]
    NoRoute(u32),

    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("rendezvous error: {0}")]
    Rendezvous(String),

    #[error("receive from rank {rank} timed out after {}s", .timeout.as_secs())]
    Timeout {
        rank: u32,
        timeout: std::time::Duration,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, TransportError>;
