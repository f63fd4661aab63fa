//! Address-book rendezvous at the fixed master address.
//!
//! Rank 0 listens at `NetConfig::master_addr`; every other rank connects,
//! reports its rank and data-listener address, and receives back the ordered
//! address book for the whole group. Links are then formed directly between
//! ranks (see `group`). Control messages are bincode frames over the same
//! `[u32 BE length][payload]` framing the data plane uses.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tracing::debug;

use cascade_types::config::{NetConfig, PipelineConfig};

use crate::error::{Result, TransportError};
use crate::frame::{read_frame, write_frame};

// ── Control messages ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ControlMsg {
    /// A rank announces itself to the master.
    Hello { rank: u32, data_addr: SocketAddr },
    /// The master's reply: data addresses indexed by rank.
    AddressBook { addrs: Vec<SocketAddr> },
    /// First frame on a freshly-established data link.
    LinkHello { from_rank: u32 },
}

pub(crate) fn encode_control(msg: &ControlMsg) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(msg, bincode::config::standard())
        .map_err(|e| TransportError::Serialization(e.to_string()))
}

pub(crate) fn decode_control(data: &[u8]) -> Result<ControlMsg> {
    let (msg, _) = bincode::serde::decode_from_slice(data, bincode::config::standard())
        .map_err(|e| TransportError::Serialization(e.to_string()))?;
    Ok(msg)
}

pub(crate) async fn send_control<W>(io: &mut W, msg: &ControlMsg) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    write_frame(io, &encode_control(msg)?).await
}

pub(crate) async fn recv_control<R>(io: &mut R) -> Result<ControlMsg>
where
    R: AsyncRead + Unpin + Send,
{
    decode_control(&read_frame(io).await?)
}

// ── Rendezvous ────────────────────────────────────────────────────────────────

/// Connect with bounded retries. Ranks start in arbitrary order, so the
/// listener may not exist yet when the first attempt fires.
pub(crate) async fn connect_with_retry(addr: SocketAddr, net: &NetConfig) -> Result<TcpStream> {
    let mut attempt = 1;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt >= net.connect_attempts => {
                return Err(TransportError::Rendezvous(format!(
                    "failed to reach {addr} after {attempt} attempts: {e}"
                )));
            }
            Err(e) => {
                debug!(%addr, attempt, error = %e, "connect attempt failed, retrying");
                attempt += 1;
                sleep(net.retry_interval).await;
            }
        }
    }
}

/// Run the rendezvous for this rank and return the full address book.
///
/// `data_addr` is the address this rank's data listener is already bound to.
/// Returns addresses indexed by rank; entry `config.rank` is `data_addr`.
pub(crate) async fn exchange_address_book(
    config: &PipelineConfig,
    net: &NetConfig,
    data_addr: SocketAddr,
) -> Result<Vec<SocketAddr>> {
    if config.rank == 0 {
        collect_as_master(config, net, data_addr).await
    } else {
        report_to_master(config, net, data_addr).await
    }
}

/// Rank 0: accept one `Hello` per peer, then reply to each with the book.
async fn collect_as_master(
    config: &PipelineConfig,
    net: &NetConfig,
    data_addr: SocketAddr,
) -> Result<Vec<SocketAddr>> {
    let listener = TcpListener::bind(net.master_addr).await.map_err(|e| {
        TransportError::Rendezvous(format!("cannot bind master address {}: {e}", net.master_addr))
    })?;
    debug!(master = %net.master_addr, "rendezvous listener up");

    let placeholder: SocketAddr = "0.0.0.0:0".parse().expect("static addr");
    let mut addrs = vec![placeholder; config.world_size as usize];
    addrs[0] = data_addr;
    let mut seen = vec![false; config.world_size as usize];
    seen[0] = true;

    let mut peers = Vec::with_capacity(config.world_size as usize - 1);
    while peers.len() < config.world_size as usize - 1 {
        let (mut stream, remote) = listener.accept().await?;
        match recv_control(&mut stream).await? {
            ControlMsg::Hello { rank, data_addr } => {
                if rank as usize >= addrs.len() {
                    return Err(TransportError::Rendezvous(format!(
                        "rank {rank} out of range for world size {}",
                        config.world_size
                    )));
                }
                if seen[rank as usize] {
                    return Err(TransportError::Rendezvous(format!(
                        "duplicate rendezvous from rank {rank}"
                    )));
                }
                debug!(rank, %remote, data = %data_addr, "rank registered");
                seen[rank as usize] = true;
                addrs[rank as usize] = data_addr;
                peers.push(stream);
            }
            other => {
                return Err(TransportError::Rendezvous(format!(
                    "expected Hello, got {other:?}"
                )));
            }
        }
    }

    let book = ControlMsg::AddressBook { addrs: addrs.clone() };
    for stream in &mut peers {
        send_control(stream, &book).await?;
    }
    Ok(addrs)
}

/// Rank > 0: report to the master and wait for the book.
async fn report_to_master(
    config: &PipelineConfig,
    net: &NetConfig,
    data_addr: SocketAddr,
) -> Result<Vec<SocketAddr>> {
    let mut stream = connect_with_retry(net.master_addr, net).await?;
    send_control(
        &mut stream,
        &ControlMsg::Hello {
            rank: config.rank,
            data_addr,
        },
    )
    .await?;

    match recv_control(&mut stream).await? {
        ControlMsg::AddressBook { addrs } => {
            if addrs.len() != config.world_size as usize {
                return Err(TransportError::Rendezvous(format!(
                    "address book holds {} entries, expected {}",
                    addrs.len(),
                    config.world_size
                )));
            }
            Ok(addrs)
        }
        other => Err(TransportError::Rendezvous(format!(
            "expected AddressBook, got {other:?}"
        ))),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
