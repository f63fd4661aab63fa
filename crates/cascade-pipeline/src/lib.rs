//! `cascade-pipeline` — pipeline-parallel inference coordination.
//!
//! This crate is a **coordination layer**, not a compute layer. The forward
//! pass executes inside an opaque model-shard collaborator; Rust decides
//! which rank runs which layers, moves activations and token ids down the
//! chain, and returns one decoded text result at the entry rank.
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   rank 0    │────▶│   rank 1    │────▶│   rank 2    │
//! │ layers 0-3  │     │ layers 4-7  │     │ layers 8-11 │
//! │ embed+own   │     │    own      │     │ own+decode  │
//! └──────▲──────┘     └─────────────┘     └──────┬──────┘
//!        │              generated text           │
//!        └───────────────────────────────────────┘
//! ```

pub mod coordinator;
pub mod echo;
pub mod error;
pub mod partition;
pub mod shard;
pub mod stage;
pub mod text;

// ── Public re-exports ────────────────────────────────────────────────────────

pub use coordinator::{PipelineCoordinator, PipelineRun};
pub use echo::EchoShard;
pub use error::{PipelineError, Result};
pub use partition::partition;
pub use shard::{ComputeError, ModelShard};
pub use stage::{Stage, StageState};
pub use text::EncodingError;
