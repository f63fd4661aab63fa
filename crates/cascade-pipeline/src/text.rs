//! Length-prefixed UTF-8 framing for the generated text result.
//!
//! The final rank encodes its text as an explicit byte length followed by
//! the raw bytes, and ships both to rank 0 as two tensor transfers: a
//! single-element `I64` scalar, then a 1-D `U8` vector. This mirrors the
//! channel's shape-then-payload discipline, specialized to text.

use cascade_net::group::GroupTransport;
use cascade_types::tensor::{Dtype, Tensor};

use crate::error::Result;
use crate::stage::SCALAR_NDIM;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("generated text is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("length prefix {length} disagrees with {actual} payload bytes")]
    LengthMismatch { length: u64, actual: usize },

    #[error("length prefix must be a single non-negative element")]
    InvalidLengthScalar,
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Split `text` into its exact UTF-8 byte length and the bytes themselves.
pub fn encode(text: &str) -> (u64, Vec<u8>) {
    let bytes = text.as_bytes().to_vec();
    (bytes.len() as u64, bytes)
}

/// Reassemble text from a length prefix and payload received in separate
/// transfers. Invalid UTF-8 or a length disagreement is fatal for the
/// request but must not crash the process.
pub fn decode(length: u64, bytes: Vec<u8>) -> std::result::Result<String, EncodingError> {
    if length != bytes.len() as u64 {
        return Err(EncodingError::LengthMismatch {
            length,
            actual: bytes.len(),
        });
    }
    Ok(String::from_utf8(bytes)?)
}

// ── Transfers ─────────────────────────────────────────────────────────────────

/// Ship `text` to `dst` as a length scalar followed by the byte payload.
pub async fn send_text<G: GroupTransport>(group: &mut G, dst: u32, text: &str) -> Result<()> {
    let (length, bytes) = encode(text);
    group.send(dst, Tensor::scalar_i64(length as i64)).await?;
    group.send(dst, Tensor::from_bytes_1d(bytes)).await?;
    Ok(())
}

/// Receive a length scalar and byte payload from `src` and decode them.
pub async fn recv_text<G: GroupTransport>(group: &mut G, src: u32) -> Result<String> {
    let length_tensor = group.recv(src, SCALAR_NDIM, Dtype::I64).await?;
    let length = match length_tensor.as_i64() {
        Some([n]) if *n >= 0 => *n as u64,
        _ => return Err(EncodingError::InvalidLengthScalar.into()),
    };

    let byte_tensor = group.recv(src, SCALAR_NDIM, Dtype::U8).await?;
    // `recv` enforced Dtype::U8, so the payload is already the raw bytes.
    let bytes = byte_tensor.into_le_bytes();

    Ok(decode(length, bytes)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
