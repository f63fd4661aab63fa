//! The process group: point-to-point links between pipeline ranks.
//!
//! The pipeline's communication graph (each rank to its successor, plus the
//! final rank back to rank 0) is exactly a ring, so the group establishes
//! one outbound link to `(rank + 1) % world_size` and accepts one inbound
//! link from `(rank + world_size - 1) % world_size`. A transfer addressed to
//! any other rank is a routing error, not a silent broadcast.
//!
//! Lifecycle: `establish` (rendezvous + link handshake) → `send`/`recv` →
//! `shutdown`. Teardown is idempotent and also runs from `Drop` as a
//! backstop for cancelled runs, so rendezvous state never leaks into a
//! subsequent run binding the same master address.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info};

use cascade_types::config::{NetConfig, PipelineConfig};
use cascade_types::tensor::{Dtype, Tensor};

use crate::error::{Result, TransportError};
use crate::frame;
use crate::rendezvous::{self, ControlMsg};

// ── Transport trait ───────────────────────────────────────────────────────────

/// Blocking point-to-point tensor transport between ranks.
///
/// Both operations suspend until the peer performs the matching call; this
/// is what gives the pipeline its strict happens-before order.
#[async_trait]
pub trait GroupTransport: Send {
    fn rank(&self) -> u32;

    fn world_size(&self) -> u32;

    /// Transfer `tensor` to `dst`. Ownership moves with the payload.
    async fn send(&mut self, dst: u32, tensor: Tensor) -> Result<()>;

    /// Receive a tensor from `src` whose dimensionality and element type are
    /// fixed by the call site.
    async fn recv(&mut self, src: u32, ndim: usize, dtype: Dtype) -> Result<Tensor>;

    /// Tear the group down. Idempotent; must run on every exit path.
    async fn shutdown(&mut self) -> Result<()>;
}

// ── TCP process group ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct TcpProcessGroup {
    rank: u32,
    world_size: u32,
    succ_rank: u32,
    pred_rank: u32,
    /// Outbound ring link (to the successor).
    succ: TcpStream,
    /// Inbound ring link (from the predecessor).
    pred: TcpStream,
    recv_timeout: Option<std::time::Duration>,
    destroyed: bool,
}

impl TcpProcessGroup {
    /// Rendezvous at the master address and wire up the ring links.
    ///
    /// Requires `world_size >= 2`: a single-rank pipeline performs no
    /// transfers and must not construct a group at all.
    pub async fn establish(config: &PipelineConfig, net: &NetConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| TransportError::Rendezvous(e.to_string()))?;
        if config.world_size < 2 {
            return Err(TransportError::Rendezvous(
                "a single-rank pipeline needs no process group".into(),
            ));
        }

        let listener = TcpListener::bind(net.listen_addr).await?;
        let data_addr = listener.local_addr()?;
        debug!(rank = config.rank, %data_addr, "data listener up");

        let addrs = rendezvous::exchange_address_book(config, net, data_addr).await?;

        let succ_rank = (config.rank + 1) % config.world_size;
        let pred_rank = (config.rank + config.world_size - 1) % config.world_size;
        let succ_addr = addrs[succ_rank as usize];

        // Dial the successor and accept the predecessor concurrently; doing
        // them in sequence would deadlock the ring.
        let (succ, pred) = tokio::try_join!(
            dial_successor(config.rank, succ_addr, net),
            accept_predecessor(&listener, pred_rank),
        )?;

        info!(
            rank = config.rank,
            world_size = config.world_size,
            succ = succ_rank,
            pred = pred_rank,
            "process group established"
        );

        Ok(Self {
            rank: config.rank,
            world_size: config.world_size,
            succ_rank,
            pred_rank,
            succ,
            pred,
            recv_timeout: net.recv_timeout,
            destroyed: false,
        })
    }
}

async fn dial_successor(
    rank: u32,
    succ_addr: std::net::SocketAddr,
    net: &NetConfig,
) -> Result<TcpStream> {
    let mut stream = rendezvous::connect_with_retry(succ_addr, net).await?;
    stream.set_nodelay(true)?;
    rendezvous::send_control(&mut stream, &ControlMsg::LinkHello { from_rank: rank }).await?;
    Ok(stream)
}

async fn accept_predecessor(listener: &TcpListener, pred_rank: u32) -> Result<TcpStream> {
    let (mut stream, remote) = listener.accept().await?;
    stream.set_nodelay(true)?;
    match rendezvous::recv_control(&mut stream).await? {
        ControlMsg::LinkHello { from_rank } if from_rank == pred_rank => {
            debug!(from_rank, %remote, "predecessor link accepted");
            Ok(stream)
        }
        ControlMsg::LinkHello { from_rank } => Err(TransportError::Handshake(format!(
            "expected link from rank {pred_rank}, got rank {from_rank}"
        ))),
        other => Err(TransportError::Handshake(format!(
            "expected LinkHello, got {other:?}"
        ))),
    }
}

/// A closed peer surfaces as EOF inside a frame read; name the rank.
fn map_eof(err: TransportError, rank: u32) -> TransportError {
    match err {
        TransportError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            TransportError::Closed { rank }
        }
        other => other,
    }
}

#[async_trait]
impl GroupTransport for TcpProcessGroup {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.world_size
    }

    async fn send(&mut self, dst: u32, tensor: Tensor) -> Result<()> {
        if dst != self.succ_rank {
            return Err(TransportError::NoRoute(dst));
        }
        debug!(
            rank = self.rank,
            dst,
            shape = ?tensor.shape(),
            dtype = %tensor.dtype(),
            "send tensor"
        );
        frame::send_tensor(&mut self.succ, tensor)
            .await
            .map_err(|e| map_eof(e, dst))
    }

    async fn recv(&mut self, src: u32, ndim: usize, dtype: Dtype) -> Result<Tensor> {
        if src != self.pred_rank {
            return Err(TransportError::NoRoute(src));
        }
        let tensor = match self.recv_timeout {
            Some(limit) => timeout(limit, frame::recv_tensor(&mut self.pred, ndim, dtype))
                .await
                .map_err(|_| TransportError::Timeout {
                    rank: src,
                    timeout: limit,
                })?
                .map_err(|e| map_eof(e, src))?,
            None => frame::recv_tensor(&mut self.pred, ndim, dtype)
                .await
                .map_err(|e| map_eof(e, src))?,
        };
        debug!(
            rank = self.rank,
            src,
            shape = ?tensor.shape(),
            dtype = %dtype,
            "recv tensor"
        );
        Ok(tensor)
    }

    async fn shutdown(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        // Half-close the outbound link so the peer's pending read observes a
        // clean EOF instead of a reset.
        let _ = self.succ.shutdown().await;
        info!(rank = self.rank, "process group torn down");
        Ok(())
    }
}

impl Drop for TcpProcessGroup {
    fn drop(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            debug!(
                rank = self.rank,
                "process group dropped without explicit shutdown; closing links"
            );
            // The sockets close as the streams drop.
        }
    }
}

impl TcpProcessGroup {
    pub fn succ_rank(&self) -> u32 {
        self.succ_rank
    }

    pub fn pred_rank(&self) -> u32 {
        self.pred_rank
    }
}
