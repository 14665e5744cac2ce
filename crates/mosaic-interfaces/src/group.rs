//! Collective group and vendor backend contracts
//!
//! A vendor library is modelled as a capability black box: it creates groups
//! from a store and a rank/size pair, and each group executes a fixed set of
//! collectives. The heterogeneous dispatcher implements the same contracts so
//! it can be installed as a backend itself.

use crate::{Store, TensorRef, Work};
use mosaic_types::{CollectiveOptions, Result, VendorKind};
use std::sync::Arc;
use std::time::Duration;

/// A formed process group able to run collectives
pub trait CollectiveGroup: Send + Sync + std::fmt::Debug {
    /// Backend name, e.g. `"nccl"` or `"mosaic"`
    fn backend_name(&self) -> &str;

    /// Rank of this process within the group
    fn rank(&self) -> usize;

    /// Number of ranks in the group
    fn size(&self) -> usize;

    /// Replicate `tensors` from the root rank to every rank
    fn broadcast(&self, tensors: &[TensorRef], opts: &CollectiveOptions) -> Result<Work>;

    /// Reduce `tensors` element-wise across ranks, in place
    fn allreduce(&self, tensors: &[TensorRef], opts: &CollectiveOptions) -> Result<Work>;

    /// Gather every rank's input into `outputs[i][rank]`
    fn allgather(
        &self,
        outputs: &[Vec<TensorRef>],
        inputs: &[TensorRef],
        opts: &CollectiveOptions,
    ) -> Result<Work>;
}

/// Shared group handle
pub type GroupRef = Arc<dyn CollectiveGroup>;

/// Creates process groups for one backend
pub trait GroupFactory: Send + Sync + std::fmt::Debug {
    /// Backend name the created groups report
    fn backend_name(&self) -> &str;

    /// Form a group of `size` ranks, blocking until every rank has joined
    fn create_group(
        &self,
        store: Arc<dyn Store>,
        rank: usize,
        size: usize,
        timeout: Duration,
    ) -> Result<GroupRef>;
}

/// A vendor collective library bound to one device family
pub trait VendorBackend: GroupFactory {
    /// Device family this library serves
    fn vendor(&self) -> VendorKind;
}
