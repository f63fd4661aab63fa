//! End-to-end protocol tests over in-memory and TCP transports.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use cascade_net::group::GroupTransport;
use cascade_net::{MemProcessGroup, TransportError};
use cascade_pipeline::{EchoShard, PipelineCoordinator, PipelineError, StageState};
use cascade_types::config::{GenerationConfig, NetConfig, PipelineConfig};
use cascade_types::error::ConfigError;
use cascade_types::tensor::{Dtype, Tensor};

const TOTAL_LAYERS: u32 = 12;

fn coordinator(rank: u32, world_size: u32) -> PipelineCoordinator<EchoShard> {
    PipelineCoordinator::new(
        PipelineConfig::new(rank, world_size).unwrap(),
        GenerationConfig::default(),
        EchoShard::new(TOTAL_LAYERS),
    )
    .unwrap()
}

// ── Scenario C: two ranks, echo shard ─────────────────────────────────────────

#[tokio::test]
async fn two_rank_run_appends_suffix() {
    let (mut groups, log) = MemProcessGroup::ring(2);
    let g1 = groups.pop().unwrap();
    let g0 = groups.pop().unwrap();

    let (r0, r1) = tokio::join!(
        coordinator(0, 2).run_with_group(g0, Some("hello")),
        coordinator(1, 2).run_with_group(g1, None),
    );

    assert_eq!(r0.unwrap(), Some("hello world".to_string()));
    assert_eq!(r1.unwrap(), None);
    assert_eq!(log.destroy_count(0), 1);
    assert_eq!(log.destroy_count(1), 1);
}

#[tokio::test]
async fn three_rank_run_matches_two_rank_result() {
    let (mut groups, _log) = MemProcessGroup::ring(3);
    let g2 = groups.pop().unwrap();
    let g1 = groups.pop().unwrap();
    let g0 = groups.pop().unwrap();

    let (r0, r1, r2) = tokio::join!(
        coordinator(0, 3).run_with_group(g0, Some("hello")),
        coordinator(1, 3).run_with_group(g1, None),
        coordinator(2, 3).run_with_group(g2, None),
    );

    assert_eq!(r0.unwrap(), Some("hello world".to_string()));
    assert_eq!(r1.unwrap(), None);
    assert_eq!(r2.unwrap(), None);
}

// ── Degenerate single-rank path ───────────────────────────────────────────────

#[tokio::test]
async fn single_rank_produces_the_same_result_without_transport() {
    // `run` with world_size == 1 never constructs a process group; the
    // NetConfig is inert. The result must match the multi-rank class.
    let result = coordinator(0, 1)
        .run(&NetConfig::default(), Some("hello"))
        .await
        .unwrap();
    assert_eq!(result, Some("hello world".to_string()));
}

#[tokio::test]
async fn single_rank_without_prompt_is_a_config_error() {
    let err = coordinator(0, 1)
        .run(&NetConfig::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Config(ConfigError::MissingPrompt)
    ));
}

// ── Ordering: logical clock over a mock channel ───────────────────────────────

type EventLog = Arc<Mutex<Vec<(u32, StageState)>>>;

fn observing(
    coordinator: PipelineCoordinator<EchoShard>,
    log: &EventLog,
) -> PipelineCoordinator<EchoShard> {
    let log = Arc::clone(log);
    coordinator.with_state_observer(Box::new(move |rank, state| {
        log.lock().unwrap().push((rank, state));
    }))
}

fn position(log: &[(u32, StageState)], rank: u32, state: StageState) -> usize {
    log.iter()
        .position(|&(r, s)| r == rank && s == state)
        .unwrap_or_else(|| panic!("no ({rank}, {state}) event in {log:?}"))
}

/// Mesh of unbounded in-process channels. Sends complete synchronously, so
/// the event log is a deterministic logical clock across ranks.
struct MockGroup {
    rank: u32,
    world_size: u32,
    inboxes: HashMap<u32, mpsc::UnboundedReceiver<Tensor>>,
    outboxes: HashMap<u32, mpsc::UnboundedSender<Tensor>>,
}

fn mock_mesh(world_size: u32) -> Vec<MockGroup> {
    let mut groups: Vec<MockGroup> = (0..world_size)
        .map(|rank| MockGroup {
            rank,
            world_size,
            inboxes: HashMap::new(),
            outboxes: HashMap::new(),
        })
        .collect();
    for src in 0..world_size {
        for dst in 0..world_size {
            if src == dst {
                continue;
            }
            let (tx, rx) = mpsc::unbounded_channel();
            groups[src as usize].outboxes.insert(dst, tx);
            groups[dst as usize].inboxes.insert(src, rx);
        }
    }
    groups
}

#[async_trait]
impl GroupTransport for MockGroup {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.world_size
    }

    async fn send(&mut self, dst: u32, tensor: Tensor) -> Result<(), TransportError> {
        self.outboxes
            .get(&dst)
            .ok_or(TransportError::NoRoute(dst))?
            .send(tensor)
            .map_err(|_| TransportError::Closed { rank: dst })
    }

    async fn recv(
        &mut self,
        src: u32,
        ndim: usize,
        _dtype: Dtype,
    ) -> Result<Tensor, TransportError> {
        let tensor = self
            .inboxes
            .get_mut(&src)
            .ok_or(TransportError::NoRoute(src))?
            .recv()
            .await
            .ok_or(TransportError::Closed { rank: src })?;
        assert_eq!(tensor.ndim(), ndim, "transfer site dimensionality");
        Ok(tensor)
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.outboxes.clear();
        Ok(())
    }
}

#[tokio::test]
async fn three_rank_happens_before_order() {
    let log: EventLog = Arc::default();
    let mut groups = mock_mesh(3);
    let g2 = groups.pop().unwrap();
    let g1 = groups.pop().unwrap();
    let g0 = groups.pop().unwrap();

    let (r0, r1, r2) = tokio::join!(
        observing(coordinator(0, 3), &log).run_with_group(g0, Some("hello")),
        observing(coordinator(1, 3), &log).run_with_group(g1, None),
        observing(coordinator(2, 3), &log).run_with_group(g2, None),
    );
    r0.unwrap();
    r1.unwrap();
    r2.unwrap();

    let events = log.lock().unwrap().clone();

    // Rank 1 cannot start computing before rank 0's sends completed, and
    // rank 2 before rank 1's.
    assert!(
        position(&events, 0, StageState::ForwardingToSuccessor)
            < position(&events, 1, StageState::Computing)
    );
    assert!(
        position(&events, 1, StageState::ForwardingToSuccessor)
            < position(&events, 2, StageState::Computing)
    );

    // Rank 0 cannot return a result before the final rank finished its send.
    assert!(
        position(&events, 2, StageState::Done)
            < position(&events, 0, StageState::ReturningResult)
    );
}

// ── Scenario D: injected transport failure ────────────────────────────────────

/// Delegating wrapper that fails every send addressed to `fail_send_to`.
struct FaultyGroup<G> {
    inner: G,
    fail_send_to: u32,
}

#[async_trait]
impl<G: GroupTransport> GroupTransport for FaultyGroup<G> {
    fn rank(&self) -> u32 {
        self.inner.rank()
    }

    fn world_size(&self) -> u32 {
        self.inner.world_size()
    }

    async fn send(&mut self, dst: u32, tensor: Tensor) -> Result<(), TransportError> {
        if dst == self.fail_send_to {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "injected send failure",
            )));
        }
        self.inner.send(dst, tensor).await
    }

    async fn recv(
        &mut self,
        src: u32,
        ndim: usize,
        dtype: Dtype,
    ) -> Result<Tensor, TransportError> {
        self.inner.recv(src, ndim, dtype).await
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await
    }
}

#[tokio::test]
async fn injected_send_failure_aborts_both_ranks_and_tears_down_once() {
    let log: EventLog = Arc::default();
    let (mut groups, teardowns) = MemProcessGroup::ring(2);
    let g1 = FaultyGroup {
        inner: groups.pop().unwrap(),
        fail_send_to: 0,
    };
    let g0 = groups.pop().unwrap();

    let (r0, r1) = tokio::join!(
        observing(coordinator(0, 2), &log).run_with_group(g0, Some("hello")),
        observing(coordinator(1, 2), &log).run_with_group(g1, None),
    );

    assert!(matches!(r1.unwrap_err(), PipelineError::Transport(_)));
    // Rank 0 was blocked on the result transfer; rank 1's teardown surfaces
    // there as a closed channel.
    assert!(matches!(r0.unwrap_err(), PipelineError::Transport(_)));

    assert_eq!(teardowns.destroy_count(0), 1);
    assert_eq!(teardowns.destroy_count(1), 1);

    let events = log.lock().unwrap().clone();
    assert!(events.contains(&(0, StageState::Done)));
    assert!(events.contains(&(1, StageState::Done)));
}

#[tokio::test]
async fn missing_prompt_after_establishment_still_tears_down() {
    let (mut groups, teardowns) = MemProcessGroup::ring(2);
    let g1 = groups.pop().unwrap();
    let g0 = groups.pop().unwrap();

    let (r0, r1) = tokio::join!(
        coordinator(0, 2).run_with_group(g0, None),
        coordinator(1, 2).run_with_group(g1, None),
    );

    assert!(matches!(
        r0.unwrap_err(),
        PipelineError::Config(ConfigError::MissingPrompt)
    ));
    assert!(matches!(r1.unwrap_err(), PipelineError::Transport(_)));
    assert_eq!(teardowns.destroy_count(0), 1);
    assert_eq!(teardowns.destroy_count(1), 1);
}

// ── Configuration rejections ──────────────────────────────────────────────────

#[test]
fn partition_smaller_than_world_is_rejected_up_front() {
    let err = PipelineCoordinator::new(
        PipelineConfig::new(0, 4).unwrap(),
        GenerationConfig::default(),
        EchoShard::new(2),
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::NotEnoughLayers { .. }));
}

// ── Full TCP run ──────────────────────────────────────────────────────────────

async fn free_master_addr() -> SocketAddr {
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);
    addr
}

#[tokio::test]
async fn two_rank_run_over_tcp() {
    let master_addr = free_master_addr().await;
    let net = NetConfig {
        master_addr,
        ..NetConfig::default()
    };

    let net0 = net.clone();
    let net1 = net.clone();
    let rank0 = tokio::spawn(async move {
        coordinator(0, 2).run(&net0, Some("hello")).await
    });
    let rank1 = tokio::spawn(async move { coordinator(1, 2).run(&net1, None).await });

    let text = rank0.await.unwrap().unwrap();
    assert_eq!(text, Some("hello world".to_string()));
    assert_eq!(rank1.await.unwrap().unwrap(), None);
}
