//! Pipeline run lifecycle.
//!
//! The coordinator owns one request end to end: validate configuration and
//! partition the model (both before any transport activity), establish the
//! process group, drive this rank's stage, and tear the group down on every
//! exit path (success, stage failure, external cancellation) exactly
//! once. If the run future itself is cancelled (external interrupt), the
//! group's `Drop` backstop closes the links so rendezvous state never leaks
//! into a later run.
//!
//! Run state is explicit and per-request ([`PipelineRun`]); nothing about a
//! request survives in process-wide globals, so serialized runs cannot leak
//! into each other.

use std::fmt;
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use cascade_net::group::GroupTransport;
use cascade_net::TcpProcessGroup;
use cascade_types::config::{GenerationConfig, NetConfig, PipelineConfig};
use cascade_types::error::ConfigError;
use cascade_types::model::LayerRange;

use crate::error::Result;
use crate::partition::partition;
use crate::shard::ModelShard;
use crate::stage::{Stage, StateObserver};

// ── Run record ────────────────────────────────────────────────────────────────

/// Ephemeral state scoped to one request: the run identity and the active
/// process-group handle. Exists from group establishment until teardown.
pub struct PipelineRun<G: GroupTransport> {
    run_id: Uuid,
    started_at: chrono::DateTime<chrono::Utc>,
    clock: Instant,
    group: G,
}

impl<G: GroupTransport> PipelineRun<G> {
    fn begin(group: G) -> Self {
        let run = Self {
            run_id: Uuid::new_v4(),
            started_at: chrono::Utc::now(),
            clock: Instant::now(),
            group,
        };
        info!(
            run_id = %run.run_id,
            rank = run.group.rank(),
            world_size = run.group.world_size(),
            started_at = %run.started_at,
            "pipeline run started"
        );
        run
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.started_at
    }

    /// Tear the group down and log the run's wall time. Consumes the run;
    /// teardown happens exactly once per rank.
    async fn finish(mut self, ok: bool) -> Result<()> {
        let teardown = self.group.shutdown().await;
        let elapsed_ms = self.clock.elapsed().as_millis() as u64;
        if ok {
            info!(run_id = %self.run_id, elapsed_ms, "pipeline run finished");
        } else {
            warn!(run_id = %self.run_id, elapsed_ms, "pipeline run failed");
        }
        Ok(teardown?)
    }
}

// ── Coordinator ───────────────────────────────────────────────────────────────

/// Drives one rank through one request.
pub struct PipelineCoordinator<M: ModelShard> {
    config: PipelineConfig,
    range: LayerRange,
    gen: GenerationConfig,
    shard: M,
    observer: Option<StateObserver>,
}

impl<M: ModelShard + fmt::Debug> fmt::Debug for PipelineCoordinator<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineCoordinator")
            .field("config", &self.config)
            .field("range", &self.range)
            .field("gen", &self.gen)
            .field("shard", &self.shard)
            .field("observer", &self.observer.as_ref().map(|_| "<observer>"))
            .finish()
    }
}

impl<M: ModelShard> PipelineCoordinator<M> {
    /// Validate the membership and partition the model. Both are
    /// configuration checks and fail before any transport activity.
    pub fn new(
        config: PipelineConfig,
        gen: GenerationConfig,
        shard: M,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let range = partition(shard.total_layers(), config.world_size, config.rank)?;
        info!(
            rank = config.rank,
            world_size = config.world_size,
            layers = %range,
            "layer range assigned"
        );
        Ok(Self {
            config,
            range,
            gen,
            shard,
            observer: None,
        })
    }

    /// Forward stage transitions to `observer` (used by protocol tests).
    pub fn with_state_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn layer_range(&self) -> LayerRange {
        self.range
    }

    /// Run this rank's part of the request over TCP.
    ///
    /// `input` must be `Some` at rank 0 and is ignored elsewhere. Only
    /// rank 0's call returns the generated text; other ranks return
    /// `Ok(None)` as a liveness signal.
    pub async fn run(self, net: &NetConfig, input: Option<&str>) -> Result<Option<String>> {
        if self.config.world_size == 1 {
            return self.run_single_rank(input).map(Some);
        }
        let group = TcpProcessGroup::establish(&self.config, net).await?;
        self.run_with_group(group, input).await
    }

    /// Drive the stage over an already-established transport, guaranteeing
    /// teardown on every exit path.
    pub async fn run_with_group<G: GroupTransport>(
        self,
        group: G,
        input: Option<&str>,
    ) -> Result<Option<String>> {
        let mut stage = self.build_stage();
        let mut run = PipelineRun::begin(group);

        let outcome = stage.run(&mut run.group, input).await;
        let teardown = run.finish(outcome.is_ok()).await;

        let text = outcome?;
        teardown?;
        Ok(text)
    }

    /// The degenerate `world_size == 1` path: no process group, no
    /// transfers; the whole request computes locally.
    fn run_single_rank(self, input: Option<&str>) -> Result<String> {
        let prompt = input.ok_or(ConfigError::MissingPrompt)?;
        let clock = Instant::now();
        let run_id = Uuid::new_v4();
        info!(run_id = %run_id, rank = 0, world_size = 1, "pipeline run started (local)");

        let mut stage = self.build_stage();
        let outcome = stage.run_local(prompt);

        let elapsed_ms = clock.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => info!(run_id = %run_id, elapsed_ms, "pipeline run finished"),
            Err(_) => warn!(run_id = %run_id, elapsed_ms, "pipeline run failed"),
        }
        outcome
    }

    fn build_stage(self) -> Stage<M> {
        let stage = Stage::new(self.config, self.range, self.gen, self.shard);
        match self.observer {
            Some(observer) => stage.with_observer(observer),
            None => stage,
        }
    }
}
