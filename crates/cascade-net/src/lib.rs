//! `cascade-net` — the pipeline process group.
//!
//! Point-to-point, blocking tensor transport between ranks: an address-book
//! rendezvous at a fixed master address, ring links between adjacent ranks,
//! and the shape-negotiated two-frame transfer protocol (shape, then
//! payload) that lets receivers allocate exact buffers for variable-length
//! sequences.

// ── Module declarations ───────────────────────────────────────────────────────

pub mod error;
pub mod frame;
pub mod group;
pub mod mem;
mod rendezvous;

// ── Public re-exports ─────────────────────────────────────────────────────────

pub use error::{Result, TransportError};
pub use frame::{read_frame, recv_tensor, send_tensor, write_frame, MAX_FRAME_BYTES};
pub use group::{GroupTransport, TcpProcessGroup};
pub use mem::{MemProcessGroup, TeardownLog};
