pub mod config;
pub mod error;
pub mod model;
pub mod tensor;

pub use config::{GenerationConfig, NetConfig, PipelineConfig};
pub use error::ConfigError;
pub use model::LayerRange;
pub use tensor::{Dtype, Tensor, TensorData, TensorError};
