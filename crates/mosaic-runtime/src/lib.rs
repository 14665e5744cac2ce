//! # Mosaic Runtime
//!
//! Reference implementations of the external seams: a host-memory tensor,
//! an in-process loopback vendor backend, device probes and the registry
//! that maps device families to vendor backends.

pub mod loopback;
pub mod probe;
pub mod registry;
pub mod tensor;

pub use loopback::{LoopbackBackend, LoopbackFabric, LoopbackGroup};
pub use probe::{Inventory, InventoryDevice, InventoryProbe, StaticProbe};
pub use registry::VendorRegistry;
pub use tensor::HostTensor;

pub use mosaic_interfaces::{TensorLike, TensorRef};
pub use mosaic_types::{DataType, DeviceHandle, Result};
