//! Tensor abstraction seen by the collective layer
//!
//! The dispatcher never interprets tensor memory itself. It reads shape,
//! dtype and placement, and stages data through [`HostBuffer`] when the
//! cross-domain transport needs host-resident elements.

use mosaic_types::{DataType, DeviceHandle, MosaicError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Device-aware tensor handle
pub trait TensorLike: Send + Sync + std::fmt::Debug {
    /// Get tensor shape
    fn shape(&self) -> &[usize];

    /// Get tensor data type
    fn dtype(&self) -> DataType;

    /// Get device where tensor resides
    fn device(&self) -> DeviceHandle;

    /// Get total number of elements
    fn numel(&self) -> usize {
        self.shape().iter().product()
    }

    /// Get size in bytes for this tensor
    fn size_bytes(&self) -> usize {
        self.numel() * self.dtype().size_bytes()
    }

    /// Copy the tensor contents into host memory
    fn to_host(&self) -> Result<HostBuffer>;

    /// Overwrite the tensor contents from host memory.
    ///
    /// The buffer must match the tensor's dtype and element count.
    fn copy_from_host(&self, buffer: &HostBuffer) -> Result<()>;
}

/// Reference-counted tensor handle
pub type TensorRef = Arc<dyn TensorLike>;

/// Host-resident element storage for the transport-supported dtypes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostBuffer {
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl HostBuffer {
    /// Zero-filled buffer of `len` elements
    pub fn zeros(dtype: DataType, len: usize) -> Result<Self> {
        match dtype {
            DataType::I32 => Ok(HostBuffer::I32(vec![0; len])),
            DataType::I64 => Ok(HostBuffer::I64(vec![0; len])),
            DataType::F32 => Ok(HostBuffer::F32(vec![0.0; len])),
            DataType::F64 => Ok(HostBuffer::F64(vec![0.0; len])),
            other => Err(MosaicError::unsupported_dtype(other)),
        }
    }

    /// Whether tensors of `dtype` can be staged through host memory
    pub fn supports(dtype: DataType) -> bool {
        matches!(
            dtype,
            DataType::I32 | DataType::I64 | DataType::F32 | DataType::F64
        )
    }

    pub fn dtype(&self) -> DataType {
        match self {
            HostBuffer::I32(_) => DataType::I32,
            HostBuffer::I64(_) => DataType::I64,
            HostBuffer::F32(_) => DataType::F32,
            HostBuffer::F64(_) => DataType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            HostBuffer::I32(v) => v.len(),
            HostBuffer::I64(v) => v.len(),
            HostBuffer::F32(v) => v.len(),
            HostBuffer::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail unless `self` can be written into storage of `dtype` and `len` elements
    pub fn check_compatible(&self, dtype: DataType, len: usize) -> Result<()> {
        if self.dtype() != dtype {
            return Err(MosaicError::internal(format!(
                "host buffer dtype {} does not match tensor dtype {}",
                self.dtype(),
                dtype
            )));
        }
        if self.len() != len {
            return Err(MosaicError::internal(format!(
                "host buffer holds {} elements, tensor holds {}",
                self.len(),
                len
            )));
        }
        Ok(())
    }
}

impl From<Vec<i32>> for HostBuffer {
    fn from(v: Vec<i32>) -> Self {
        HostBuffer::I32(v)
    }
}

impl From<Vec<i64>> for HostBuffer {
    fn from(v: Vec<i64>) -> Self {
        HostBuffer::I64(v)
    }
}

impl From<Vec<f32>> for HostBuffer {
    fn from(v: Vec<f32>) -> Self {
        HostBuffer::F32(v)
    }
}

impl From<Vec<f64>> for HostBuffer {
    fn from(v: Vec<f64>) -> Self {
        HostBuffer::F64(v)
    }
}
