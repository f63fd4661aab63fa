//! In-process transport backed by tokio duplex pipes.
//!
//! Carries the same shape-framed wire format as the TCP links, so protocol
//! tests exercise the real codec without sockets. A shared [`TeardownLog`]
//! records every teardown per rank, letting tests assert that the group is
//! destroyed exactly once on every exit path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
use tracing::debug;

use cascade_types::tensor::{Dtype, Tensor};

use crate::error::{Result, TransportError};
use crate::frame;
use crate::group::GroupTransport;

/// Per-link buffer. Large enough that test-sized transfers never block the
/// writer; real backpressure behavior belongs to the TCP transport.
const MEM_BUF_BYTES: usize = 1024 * 1024;

// ── Teardown log ──────────────────────────────────────────────────────────────

/// Shared record of group teardowns, keyed by rank.
#[derive(Debug, Clone, Default)]
pub struct TeardownLog(Arc<Mutex<HashMap<u32, u32>>>);

impl TeardownLog {
    /// How many times `rank` has torn its group down.
    pub fn destroy_count(&self, rank: u32) -> u32 {
        self.0
            .lock()
            .map(|m| m.get(&rank).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn record(&self, rank: u32) {
        if let Ok(mut m) = self.0.lock() {
            *m.entry(rank).or_insert(0) += 1;
        }
    }
}

// ── In-memory group ───────────────────────────────────────────────────────────

pub struct MemProcessGroup {
    rank: u32,
    world_size: u32,
    succ_rank: u32,
    pred_rank: u32,
    succ: DuplexStream,
    pred: DuplexStream,
    teardown: TeardownLog,
    destroyed: bool,
}

impl MemProcessGroup {
    /// Build a ring of `world_size` endpoints sharing one teardown log.
    ///
    /// Endpoint `r` in the returned vector is rank `r`'s group handle.
    pub fn ring(world_size: u32) -> (Vec<MemProcessGroup>, TeardownLog) {
        assert!(world_size >= 2, "a ring needs at least two ranks");
        let log = TeardownLog::default();

        // Link i carries rank i → rank (i + 1) % world_size.
        let mut senders = Vec::with_capacity(world_size as usize);
        let mut receivers: Vec<Option<DuplexStream>> = Vec::new();
        receivers.resize_with(world_size as usize, || None);
        for i in 0..world_size {
            let (tx, rx) = duplex(MEM_BUF_BYTES);
            senders.push(tx);
            receivers[((i + 1) % world_size) as usize] = Some(rx);
        }

        let groups = senders
            .into_iter()
            .zip(receivers.into_iter())
            .enumerate()
            .map(|(r, (succ, pred))| MemProcessGroup {
                rank: r as u32,
                world_size,
                succ_rank: (r as u32 + 1) % world_size,
                pred_rank: (r as u32 + world_size - 1) % world_size,
                succ,
                pred: pred.expect("every rank has a predecessor link"),
                teardown: log.clone(),
                destroyed: false,
            })
            .collect();

        (groups, log)
    }
}

#[async_trait]
impl GroupTransport for MemProcessGroup {
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
        frame::send_tensor(&mut self.succ, tensor)
            .await
            .map_err(|e| map_eof(e, dst))
    }

    async fn recv(&mut self, src: u32, ndim: usize, dtype: Dtype) -> Result<Tensor> {
        if src != self.pred_rank {
            return Err(TransportError::NoRoute(src));
        }
        frame::recv_tensor(&mut self.pred, ndim, dtype)
            .await
            .map_err(|e| map_eof(e, src))
    }

    async fn shutdown(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        let _ = self.succ.shutdown().await;
        self.teardown.record(self.rank);
        debug!(rank = self.rank, "in-memory group torn down");
        Ok(())
    }
}

impl Drop for MemProcessGroup {
    fn drop(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.teardown.record(self.rank);
        }
    }
}

fn map_eof(err: TransportError, rank: u32) -> TransportError {
    match err {
        TransportError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            TransportError::Closed { rank }
        }
        other => other,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
