//! N-dimensional buffers exchanged between pipeline stages.
//!
//! A [`Tensor`] pairs a shape with typed storage. Element type is fixed per
//! transfer site by protocol convention (activations `F32`, token ids `I64`,
//! text bytes `U8`), so the wire carries only the shape; the transport layer
//! moves the payload as raw little-endian bytes.

use serde::{Deserialize, Serialize};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    #[error("shape {shape:?} implies {expected} elements, storage holds {actual}")]
    ShapeMismatch {
        shape: Vec<u64>,
        expected: u64,
        actual: u64,
    },

    #[error("shape {0:?} overflows the element count")]
    Overflow(Vec<u64>),

    #[error("payload of {actual} bytes does not split into {dtype} elements ({expected} bytes expected)")]
    ByteLengthMismatch {
        dtype: Dtype,
        expected: u64,
        actual: usize,
    },
}

// ── Dtype ─────────────────────────────────────────────────────────────────────

/// Element type for tensors crossing the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Dtype {
    /// Activations.
    F32 = 0,
    /// Token ids and length scalars.
    I64 = 1,
    /// Encoded text bytes.
    U8 = 2,
}

impl Dtype {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::F32),
            1 => Some(Self::I64),
            2 => Some(Self::U8),
            _ => None,
        }
    }

    /// Bytes per element for this dtype.
    pub fn element_bytes(&self) -> usize {
        match self {
            Self::F32 => 4,
            Self::I64 => 8,
            Self::U8 => 1,
        }
    }
}

impl std::fmt::Display for Dtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

// ── Storage ───────────────────────────────────────────────────────────────────

/// Typed element storage backing a [`Tensor`].
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
}

impl TensorData {
    pub fn dtype(&self) -> Dtype {
        match self {
            Self::F32(_) => Dtype::F32,
            Self::I64(_) => Dtype::I64,
            Self::U8(_) => Dtype::U8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Tensor ────────────────────────────────────────────────────────────────────

/// Shape plus storage. Construction always validates that the shape's element
/// count matches the storage length, so every `Tensor` in flight is
/// internally consistent.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<u64>,
    data: TensorData,
}

impl Tensor {
    pub fn new(shape: Vec<u64>, data: TensorData) -> Result<Self, TensorError> {
        let expected = element_count(&shape)?;
        if expected != data.len() as u64 {
            return Err(TensorError::ShapeMismatch {
                shape,
                expected,
                actual: data.len() as u64,
            });
        }
        Ok(Self { shape, data })
    }

    pub fn from_f32(shape: Vec<u64>, values: Vec<f32>) -> Result<Self, TensorError> {
        Self::new(shape, TensorData::F32(values))
    }

    pub fn from_i64(shape: Vec<u64>, values: Vec<i64>) -> Result<Self, TensorError> {
        Self::new(shape, TensorData::I64(values))
    }

    pub fn from_u8(shape: Vec<u64>, values: Vec<u8>) -> Result<Self, TensorError> {
        Self::new(shape, TensorData::U8(values))
    }

    /// A single-element `I64` vector, shape `[1]`. Used for length prefixes.
    pub fn scalar_i64(value: i64) -> Self {
        Self {
            shape: vec![1],
            data: TensorData::I64(vec![value]),
        }
    }

    /// A 1-D byte vector, shape `[len]`. Used for encoded text.
    pub fn from_bytes_1d(bytes: Vec<u8>) -> Self {
        Self {
            shape: vec![bytes.len() as u64],
            data: TensorData::U8(bytes),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn dtype(&self) -> Dtype {
        self.data.dtype()
    }

    pub fn num_elements(&self) -> u64 {
        self.data.len() as u64
    }

    /// Payload size on the wire.
    pub fn byte_len(&self) -> usize {
        self.data.len() * self.dtype().element_bytes()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            TensorData::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match &self.data {
            TensorData::U8(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_i64(self) -> Option<Vec<i64>> {
        match self.data {
            TensorData::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_u8(self) -> Option<Vec<u8>> {
        match self.data {
            TensorData::U8(v) => Some(v),
            _ => None,
        }
    }

    // ── Wire conversion ──────────────────────────────────────────────────

    /// Serialize the payload as little-endian bytes. `U8` storage moves
    /// without copying.
    pub fn into_le_bytes(self) -> Vec<u8> {
        match self.data {
            TensorData::F32(v) => {
                let mut out = Vec::with_capacity(v.len() * 4);
                for x in v {
                    out.extend_from_slice(&x.to_le_bytes());
                }
                out
            }
            TensorData::I64(v) => {
                let mut out = Vec::with_capacity(v.len() * 8);
                for x in v {
                    out.extend_from_slice(&x.to_le_bytes());
                }
                out
            }
            TensorData::U8(v) => v,
        }
    }

    /// Rebuild a tensor from a declared shape and a little-endian payload.
    /// The payload length must match the shape exactly.
    pub fn from_le_bytes(
        dtype: Dtype,
        shape: Vec<u64>,
        bytes: Vec<u8>,
    ) -> Result<Self, TensorError> {
        let elements = element_count(&shape)?;
        let expected_bytes = elements
            .checked_mul(dtype.element_bytes() as u64)
            .ok_or_else(|| TensorError::Overflow(shape.clone()))?;
        if expected_bytes != bytes.len() as u64 {
            return Err(TensorError::ByteLengthMismatch {
                dtype,
                expected: expected_bytes,
                actual: bytes.len(),
            });
        }

        let data = match dtype {
            Dtype::F32 => TensorData::F32(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            Dtype::I64 => TensorData::I64(
                bytes
                    .chunks_exact(8)
                    .map(|c| {
                        i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
                    })
                    .collect(),
            ),
            Dtype::U8 => TensorData::U8(bytes),
        };

        Self::new(shape, data)
    }
}

/// Checked product of the shape's dimensions. An empty shape has one element
/// (a true scalar); a zero dimension yields zero elements.
fn element_count(shape: &[u64]) -> Result<u64, TensorError> {
    shape
        .iter()
        .try_fold(1u64, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| TensorError::Overflow(shape.to_vec()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
