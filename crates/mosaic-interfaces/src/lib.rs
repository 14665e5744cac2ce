//! Interface definitions for the Mosaic collective backend
//!
//! Everything the dispatcher talks to is reached through a trait defined
//! here: the tensor runtime, the rendezvous key-value store, vendor device
//! management and vendor collective libraries. The one concrete piece is the
//! one-shot [`work`] handle, which every group implementation shares.

pub mod deadline;
pub mod group;
pub mod probe;
pub mod store;
pub mod tensor;
pub mod work;

pub use group::{CollectiveGroup, GroupFactory, GroupRef, VendorBackend};
pub use probe::DeviceProbe;
pub use store::Store;
pub use tensor::{HostBuffer, TensorLike, TensorRef};
pub use work::{promise, Completion, Promise, Work};

pub use mosaic_types::{
    CollectiveOptions, DataType, Device, DeviceHandle, MosaicError, OpKind, ReduceOp, Result,
    VendorKind,
};
