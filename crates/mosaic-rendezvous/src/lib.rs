//! # Mosaic Rendezvous
//!
//! Generic inter-node layer of the backend. Ranks find each other through a
//! key-value [`Store`](mosaic_interfaces::Store), form a full TCP mesh, and run
//! blocking one-to-all broadcast and ring all-reduce over host buffers of any
//! [`Element`] type.

pub mod collectives;
pub mod element;
pub mod host;
pub mod mesh;
pub mod stats;
pub mod store;
pub mod wire;

pub use element::{decode, encode, Element};
pub use host::{combine_host, divide_host};
pub use mesh::MeshContext;
pub use stats::{PrimitiveStats, TransportStats};
pub use store::{FileStore, MemoryStore, PrefixStore};

pub use mosaic_types::{MosaicError, ReduceOp, Result};

#[doc(hidden)]
pub mod __private {
    pub use mosaic_interfaces::HostBuffer;
}
