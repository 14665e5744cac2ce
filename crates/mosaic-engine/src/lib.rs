//! # Mosaic Engine
//!
//! Collective communication backend spanning accelerators from different
//! vendors in one training job.
//!
//! ## Overview
//!
//! - Device discovery and health screening across vendor probes ([`registry`])
//! - The ordered list of usable devices that fixes the world size ([`scheduler`])
//! - Process-wide state: configuration, devices and vendor libraries ([`context`])
//! - The heterogeneous process group and its dispatch table ([`dispatcher`])
//! - Group construction over vendor sub-groups and the cross-domain mesh ([`factory`])
//! - Mean correction for stitched all-reduce results ([`correction`])
//! - Capability-weighted batch partitioning ([`partition`])
//!
//! Each collective runs in two stages: the vendor library reduces or
//! broadcasts within its device family, then local rank 0 of every domain
//! stitches the results over a TCP full mesh and re-broadcasts locally.

pub mod context;
pub mod correction;
pub mod dispatcher;
pub mod factory;
pub mod partition;
pub mod registry;
pub mod scheduler;

pub use context::BackendContext;
pub use correction::{
    apply_mean_correction, correct_host, correction_applies, ring_reduce_op, CorrectionStage,
};
pub use dispatcher::{
    route, CollectiveRequest, DispatchState, HeteroProcessGroup, Route, CROSS_DOMAIN_ROOT,
    DISPATCH_TABLE,
};
pub use factory::{HeteroGroupFactory, BACKEND_NAME};
pub use partition::{batch_size_for, CapabilityPlan, MAX_COMPUTE_CAPABILITY};
pub use registry::DeviceRegistry;
pub use scheduler::Scheduler;

pub use mosaic_interfaces::{CollectiveGroup, GroupFactory, Work};
pub use mosaic_types::{
    BackendConfig, CollectiveOptions, MeanCorrection, MosaicError, OpKind, ReduceOp, Result,
};
