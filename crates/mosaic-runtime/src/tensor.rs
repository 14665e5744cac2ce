//! Host-memory tensor carrying a device handle

use mosaic_interfaces::{HostBuffer, TensorLike, TensorRef};
use mosaic_types::{DataType, DeviceHandle, MosaicError, Result};
use parking_lot::RwLock;
use std::sync::Arc;

/// Tensor whose storage lives in host memory but which reports the device it
/// stands in for, so dispatch and placement checks see realistic handles.
#[derive(Debug)]
pub struct HostTensor {
    shape: Vec<usize>,
    dtype: DataType,
    device: DeviceHandle,
    data: RwLock<HostBuffer>,
}

impl HostTensor {
    pub fn new(shape: &[usize], device: DeviceHandle, data: impl Into<HostBuffer>) -> Result<Self> {
        let data = data.into();
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(MosaicError::internal(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                numel,
                data.len()
            )));
        }
        Ok(Self {
            shape: shape.to_vec(),
            dtype: data.dtype(),
            device,
            data: RwLock::new(data),
        })
    }

    pub fn zeros(shape: &[usize], dtype: DataType, device: DeviceHandle) -> Result<Self> {
        let numel = shape.iter().product();
        Self::new(shape, device, HostBuffer::zeros(dtype, numel)?)
    }

    /// One-dimensional tensor from a vector
    pub fn from_vec<T>(values: Vec<T>, device: DeviceHandle) -> Result<Self>
    where
        Vec<T>: Into<HostBuffer>,
    {
        let len = values.len();
        Self::new(&[len], device, values)
    }

    pub fn into_ref(self) -> TensorRef {
        Arc::new(self)
    }

    /// Snapshot of the current contents
    pub fn data(&self) -> HostBuffer {
        self.data.read().clone()
    }
}

impl TensorLike for HostTensor {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DataType {
        self.dtype
    }

    fn device(&self) -> DeviceHandle {
        self.device
    }

    fn to_host(&self) -> Result<HostBuffer> {
        Ok(self.data())
    }

    fn copy_from_host(&self, buffer: &HostBuffer) -> Result<()> {
        buffer.check_compatible(self.dtype, self.numel())?;
        *self.data.write() = buffer.clone();
        Ok(())
    }
}
