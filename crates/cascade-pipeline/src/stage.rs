//! Per-rank stage state machine.
//!
//! ```text
//! rank 0:      AwaitingInput ──compute──▶ Computing ──send──▶ ForwardingToSuccessor
//!                   ──recv text──▶ ReturningResult ──▶ Done
//! interior r:  AwaitingPredecessor ──recv──▶ Computing ──send──▶ ForwardingToSuccessor ──▶ Done
//! final rank:  AwaitingPredecessor ──recv──▶ Computing ──▶ Generating ──send text──▶ Done
//! ```
//!
//! A single-rank pipeline collapses to
//! `AwaitingInput → Computing → Generating → ReturningResult → Done` with no
//! transport involved. Any failure, in any state, transitions the stage
//! directly to `Done` before the error propagates; the coordinator owns the
//! teardown that follows.

use tracing::{debug, info, warn};

use cascade_net::group::GroupTransport;
use cascade_types::config::{GenerationConfig, PipelineConfig};
use cascade_types::error::ConfigError;
use cascade_types::model::LayerRange;
use cascade_types::tensor::Dtype;

use crate::error::Result;
use crate::shard::ModelShard;
use crate::text;

// ── Wire conventions ──────────────────────────────────────────────────────────

/// Activations travel as `[batch, seq, hidden]`.
pub const ACTIVATION_NDIM: usize = 3;
/// Token ids travel as `[batch, seq]`.
pub const TOKEN_NDIM: usize = 2;
/// Length prefixes and byte payloads travel as 1-D vectors.
pub const SCALAR_NDIM: usize = 1;

// ── States ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Rank 0, before the prompt is consumed.
    AwaitingInput,
    /// Rank > 0, blocked on the predecessor's transfers.
    AwaitingPredecessor,
    /// Owned layers are running.
    Computing,
    /// Outputs handed to the successor; rank 0 then waits for the result.
    ForwardingToSuccessor,
    /// Final rank's autoregressive decode loop.
    Generating,
    /// Rank 0, result decoded and about to be returned.
    ReturningResult,
    /// Terminal, reached on success and on failure alike.
    Done,
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Callback invoked on every transition with `(rank, new_state)`. Lets tests
/// assemble a cross-rank logical clock.
pub type StateObserver = Box<dyn FnMut(u32, StageState) + Send>;

// ── Stage ─────────────────────────────────────────────────────────────────────

/// One rank's unit of work: consume from the predecessor (or the raw prompt
/// at rank 0), apply the owned layer range, forward to the successor (or
/// finalize at the last rank).
pub struct Stage<M: ModelShard> {
    config: PipelineConfig,
    range: LayerRange,
    gen: GenerationConfig,
    shard: M,
    state: StageState,
    observer: Option<StateObserver>,
}

impl<M: ModelShard> Stage<M> {
    pub fn new(
        config: PipelineConfig,
        range: LayerRange,
        gen: GenerationConfig,
        shard: M,
    ) -> Self {
        let state = if config.is_first() {
            StageState::AwaitingInput
        } else {
            StageState::AwaitingPredecessor
        };
        Self {
            config,
            range,
            gen,
            shard,
            state,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    fn enter(&mut self, next: StageState) {
        debug!(
            rank = self.config.rank,
            from = %self.state,
            to = %next,
            "stage transition"
        );
        self.state = next;
        if let Some(observer) = self.observer.as_mut() {
            observer(self.config.rank, next);
        }
    }

    /// Drive this rank's role over an established transport. Requires
    /// `world_size >= 2`; the single-rank case goes through [`run_local`].
    ///
    /// Returns `Some(text)` at rank 0, `None` elsewhere.
    ///
    /// [`run_local`]: Stage::run_local
    pub async fn run<G: GroupTransport>(
        &mut self,
        group: &mut G,
        input: Option<&str>,
    ) -> Result<Option<String>> {
        let outcome = self.drive(group, input).await;
        if let Err(e) = &outcome {
            warn!(rank = self.config.rank, error = %e, "stage failed");
        }
        self.enter(StageState::Done);
        outcome
    }

    async fn drive<G: GroupTransport>(
        &mut self,
        group: &mut G,
        input: Option<&str>,
    ) -> Result<Option<String>> {
        if self.config.is_first() {
            self.drive_first(group, input).await.map(Some)
        } else if self.config.is_last() {
            self.drive_last(group).await.map(|()| None)
        } else {
            self.drive_interior(group).await.map(|()| None)
        }
    }

    /// Rank 0: tokenize + embed + own layers, hand off to rank 1, then wait
    /// for the final rank's text.
    async fn drive_first<G: GroupTransport>(
        &mut self,
        group: &mut G,
        input: Option<&str>,
    ) -> Result<String> {
        let prompt = input.ok_or(ConfigError::MissingPrompt)?;
        self.enter(StageState::Computing);

        let token_ids = self.shard.tokenize(prompt)?;
        let activations = self.shard.embed(&token_ids)?;
        let activations = self.shard.apply_layers(activations, self.range)?;

        let succ = self.config.rank + 1;
        group.send(succ, activations).await?;
        group.send(succ, token_ids).await?;
        self.enter(StageState::ForwardingToSuccessor);

        let text = text::recv_text(group, self.config.last_rank()).await?;
        self.enter(StageState::ReturningResult);
        info!(rank = self.config.rank, bytes = text.len(), "result decoded");
        Ok(text)
    }

    /// Interior rank: receive, apply owned layers, forward.
    async fn drive_interior<G: GroupTransport>(&mut self, group: &mut G) -> Result<()> {
        let pred = self.config.rank - 1;
        let activations = group.recv(pred, ACTIVATION_NDIM, Dtype::F32).await?;
        let token_ids = group.recv(pred, TOKEN_NDIM, Dtype::I64).await?;
        self.enter(StageState::Computing);

        let activations = self.shard.apply_layers(activations, self.range)?;

        let succ = self.config.rank + 1;
        group.send(succ, activations).await?;
        group.send(succ, token_ids).await?;
        self.enter(StageState::ForwardingToSuccessor);
        Ok(())
    }

    /// Final rank: receive, apply owned layers, generate, ship the text back
    /// to rank 0.
    async fn drive_last<G: GroupTransport>(&mut self, group: &mut G) -> Result<()> {
        let pred = self.config.rank - 1;
        let activations = group.recv(pred, ACTIVATION_NDIM, Dtype::F32).await?;
        let token_ids = group.recv(pred, TOKEN_NDIM, Dtype::I64).await?;
        self.enter(StageState::Computing);

        let activations = self.shard.apply_layers(activations, self.range)?;
        self.enter(StageState::Generating);

        let generated = self.shard.generate(&activations, &token_ids, &self.gen)?;
        let result = self.shard.detokenize(&generated)?;
        info!(
            rank = self.config.rank,
            tokens = generated.num_elements(),
            "generation complete"
        );

        text::send_text(group, 0, &result).await?;
        Ok(())
    }

    /// Degenerate single-rank pipeline: the full compute and generate path
    /// runs locally, with no transfers and no process group.
    pub fn run_local(&mut self, input: &str) -> Result<String> {
        let outcome = self.drive_local(input);
        if let Err(e) = &outcome {
            warn!(rank = self.config.rank, error = %e, "stage failed");
        }
        self.enter(StageState::Done);
        outcome
    }

    fn drive_local(&mut self, input: &str) -> Result<String> {
        self.enter(StageState::Computing);
        let token_ids = self.shard.tokenize(input)?;
        let activations = self.shard.embed(&token_ids)?;
        let activations = self.shard.apply_layers(activations, self.range)?;

        self.enter(StageState::Generating);
        let generated = self.shard.generate(&activations, &token_ids, &self.gen)?;
        let result = self.shard.detokenize(&generated)?;

        self.enter(StageState::ReturningResult);
        Ok(result)
    }
}
