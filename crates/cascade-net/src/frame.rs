//! Wire framing for the shape-negotiated tensor channel.
//!
//! Every message is a `[u32 BE length][payload]` frame. A logical tensor
//! transfer is two frames in strict order:
//!
//! 1. the shape vector: `ndim` little-endian `i64` dims, where `ndim` is a
//!    per-call-site constant (receivers never infer it);
//! 2. the raw payload, exactly `product(dims) × element_bytes` bytes.
//!
//! The receiver reads the shape fully, allocates a buffer of exactly that
//! size, then reads the payload into it. Shape is not statically known
//! (batch and sequence length vary per request), so every transfer is this
//! two-step handshake rather than a fixed-size read. Any disagreement
//! between the declared shape and the payload is a protocol desync and
//! fatal for the run.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use cascade_types::tensor::{Dtype, Tensor};

use crate::error::{Result, TransportError};

/// Safety limit: reject any single frame larger than 128 MiB. Realistic
/// activation payloads sit well below this (a 4096-wide f32 hidden state at
/// 2048 tokens is 32 MiB).
pub const MAX_FRAME_BYTES: usize = 128 * 1024 * 1024;

// ── Frames ────────────────────────────────────────────────────────────────────

/// Write a `[u32 BE length][payload]` frame.
pub async fn write_frame<W>(io: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    if data.len() > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge {
            len: data.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    let len = data.len() as u32;
    io.write_all(&len.to_be_bytes()).await?;
    io.write_all(data).await?;
    io.flush().await?;
    Ok(())
}

/// Read a `[u32 BE length][payload]` frame.
pub async fn read_frame<R>(io: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + Send,
{
    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge {
            len,
            max: MAX_FRAME_BYTES,
        });
    }
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    Ok(buf)
}

// ── Tensor transfers ──────────────────────────────────────────────────────────

/// Transmit `tensor` as a shape frame followed by a payload frame.
///
/// Consumes the tensor: ownership transfers to the peer on send.
pub async fn send_tensor<W>(io: &mut W, tensor: Tensor) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut shape_buf = Vec::with_capacity(tensor.ndim() * 8);
    for &dim in tensor.shape() {
        shape_buf.extend_from_slice(&(dim as i64).to_le_bytes());
    }
    write_frame(io, &shape_buf).await?;
    write_frame(io, &tensor.into_le_bytes()).await?;
    Ok(())
}

/// Receive a tensor whose dimensionality and element type are fixed by the
/// call site. Allocates exactly the declared shape before the payload
/// arrives; fails if the payload disagrees with it.
pub async fn recv_tensor<R>(io: &mut R, ndim: usize, dtype: Dtype) -> Result<Tensor>
where
    R: AsyncRead + Unpin + Send,
{
    let shape_buf = read_frame(io).await?;
    if shape_buf.len() != ndim * 8 {
        return Err(TransportError::ShapeFrameMismatch {
            ndim,
            expected: ndim * 8,
            got: shape_buf.len(),
        });
    }

    let mut shape = Vec::with_capacity(ndim);
    for chunk in shape_buf.chunks_exact(8) {
        let dim = i64::from_le_bytes([
            chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
        ]);
        if dim < 0 {
            return Err(TransportError::InvalidDimension(dim));
        }
        shape.push(dim as u64);
    }

    let expected = expected_payload_bytes(&shape, dtype)?;
    let payload = read_frame(io).await?;
    if payload.len() as u64 != expected {
        return Err(TransportError::PayloadMismatch {
            shape,
            expected,
            got: payload.len(),
        });
    }

    Ok(Tensor::from_le_bytes(dtype, shape, payload)?)
}

fn expected_payload_bytes(shape: &[u64], dtype: Dtype) -> Result<u64> {
    shape
        .iter()
        .try_fold(1u64, |acc, &d| acc.checked_mul(d))
        .and_then(|n| n.checked_mul(dtype.element_bytes() as u64))
        .ok_or_else(|| {
            TransportError::Tensor(cascade_types::tensor::TensorError::Overflow(shape.to_vec()))
        })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut a, mut b) = duplex(1024);
        write_frame(&mut a, b"payload").await.unwrap();
        let got = read_frame(&mut b).await.unwrap();
        assert_eq!(got, b"payload");
    }

    #[tokio::test]
    async fn empty_frame_round_trip() {
        let (mut a, mut b) = duplex(64);
        write_frame(&mut a, &[]).await.unwrap();
        assert!(read_frame(&mut b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_oversized_frame_header() {
        let (mut a, mut b) = duplex(64);
        // Forge a header claiming more than the cap.
        let len = (MAX_FRAME_BYTES as u32) + 1;
        tokio::io::AsyncWriteExt::write_all(&mut a, &len.to_be_bytes())
            .await
            .unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn eof_mid_transfer_is_an_error() {
        let (mut a, mut b) = duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut a, &100u32.to_be_bytes())
            .await
            .unwrap();
        drop(a); // close before the payload
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[tokio::test]
    async fn activation_tensor_round_trip() {
        let (mut a, mut b) = duplex(4096);
        let t = Tensor::from_f32(vec![1, 4, 8], (0..32).map(|i| i as f32).collect()).unwrap();
        let expected = t.clone();

        send_tensor(&mut a, t).await.unwrap();
        let got = recv_tensor(&mut b, 3, Dtype::F32).await.unwrap();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn token_id_tensor_round_trip() {
        let (mut a, mut b) = duplex(1024);
        let t = Tensor::from_i64(vec![1, 5], vec![104, 101, 108, 108, 111]).unwrap();
        send_tensor(&mut a, t).await.unwrap();
        let got = recv_tensor(&mut b, 2, Dtype::I64).await.unwrap();
        assert_eq!(got.shape(), &[1, 5]);
        assert_eq!(got.as_i64().unwrap(), &[104, 101, 108, 108, 111]);
    }

    #[tokio::test]
    async fn empty_byte_tensor_round_trip() {
        let (mut a, mut b) = duplex(64);
        send_tensor(&mut a, Tensor::from_bytes_1d(Vec::new()))
            .await
            .unwrap();
        let got = recv_tensor(&mut b, 1, Dtype::U8).await.unwrap();
        assert_eq!(got.shape(), &[0]);
        assert_eq!(got.num_elements(), 0);
    }

    #[tokio::test]
    async fn wrong_ndim_is_a_desync() {
        let (mut a, mut b) = duplex(1024);
        let t = Tensor::from_i64(vec![1, 5], vec![0; 5]).unwrap();
        send_tensor(&mut a, t).await.unwrap();
        // Receiver expects a 3-D activation at this site.
        let err = recv_tensor(&mut b, 3, Dtype::F32).await.unwrap_err();
        assert!(matches!(err, TransportError::ShapeFrameMismatch { .. }));
    }

    #[tokio::test]
    async fn payload_disagreeing_with_shape_is_fatal() {
        let (mut a, mut b) = duplex(1024);
        // Declare [2, 2] i64 (32 bytes) but ship 8 bytes.
        let mut shape_buf = Vec::new();
        shape_buf.extend_from_slice(&2i64.to_le_bytes());
        shape_buf.extend_from_slice(&2i64.to_le_bytes());
        write_frame(&mut a, &shape_buf).await.unwrap();
        write_frame(&mut a, &[0u8; 8]).await.unwrap();

        let err = recv_tensor(&mut b, 2, Dtype::I64).await.unwrap_err();
        assert!(matches!(err, TransportError::PayloadMismatch { .. }));
    }

    #[tokio::test]
    async fn negative_dimension_rejected() {
        let (mut a, mut b) = duplex(64);
        write_frame(&mut a, &(-1i64).to_le_bytes()).await.unwrap();
        let err = recv_tensor(&mut b, 1, Dtype::U8).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidDimension(-1)));
    }
}
