//! Collective operation kinds and per-call options

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Every collective operation the process-group surface declares.
///
/// The set is closed: only `Broadcast`, `Allreduce` and `Allgather` have an
/// implementation path, the remaining kinds exist so that callers get a
/// distinguishable failure instead of a silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Broadcast,
    Allreduce,
    Allgather,
    AllreduceCoalesced,
    Reduce,
    Gather,
    Scatter,
    ReduceScatter,
    Alltoall,
    AlltoallBase,
    Send,
    Recv,
    RecvAnysource,
    Barrier,
    AllgatherBase,
}

impl OpKind {
    /// All declared operation kinds, in declaration order
    pub const ALL: [OpKind; 15] = [
        OpKind::Broadcast,
        OpKind::Allreduce,
        OpKind::Allgather,
        OpKind::AllreduceCoalesced,
        OpKind::Reduce,
        OpKind::Gather,
        OpKind::Scatter,
        OpKind::ReduceScatter,
        OpKind::Alltoall,
        OpKind::AlltoallBase,
        OpKind::Send,
        OpKind::Recv,
        OpKind::RecvAnysource,
        OpKind::Barrier,
        OpKind::AllgatherBase,
    ];

    /// Canonical operation name as exposed to the embedding framework
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Broadcast => "broadcast",
            OpKind::Allreduce => "allreduce",
            OpKind::Allgather => "allgather",
            OpKind::AllreduceCoalesced => "allreduce_coalesced",
            OpKind::Reduce => "reduce",
            OpKind::Gather => "gather",
            OpKind::Scatter => "scatter",
            OpKind::ReduceScatter => "reduce_scatter",
            OpKind::Alltoall => "alltoall",
            OpKind::AlltoallBase => "alltoall_base",
            OpKind::Send => "send",
            OpKind::Recv => "recv",
            OpKind::RecvAnysource => "recvAnysource",
            OpKind::Barrier => "barrier",
            OpKind::AllgatherBase => "_allgather_base",
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Reduction operator applied by all-reduce style collectives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceOp {
    #[default]
    Sum,
    /// Sum followed by division by the group size
    Avg,
    Product,
    Min,
    Max,
}

impl ReduceOp {
    /// Whether a mean correction is meaningful after this operator.
    ///
    /// Sum and average results are arithmetic means once divided; extrema
    /// and products are not.
    pub fn is_additive(&self) -> bool {
        matches!(self, ReduceOp::Sum | ReduceOp::Avg)
    }
}

impl std::fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Avg => "avg",
            ReduceOp::Product => "product",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
        };
        f.write_str(name)
    }
}

/// Options shared by every collective call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectiveOptions {
    /// Reduction operator (all-reduce family)
    pub reduce_op: ReduceOp,
    /// Root rank (broadcast family)
    pub root_rank: usize,
    /// Per-call timeout; `None` falls back to the group default
    pub timeout: Option<Duration>,
}

impl Default for CollectiveOptions {
    fn default() -> Self {
        Self {
            reduce_op: ReduceOp::Sum,
            root_rank: 0,
            timeout: None,
        }
    }
}

impl CollectiveOptions {
    /// Options for a broadcast rooted at `root_rank`
    pub fn broadcast(root_rank: usize) -> Self {
        Self {
            root_rank,
            ..Default::default()
        }
    }

    /// Options for an all-reduce with the given operator
    pub fn allreduce(reduce_op: ReduceOp) -> Self {
        Self {
            reduce_op,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
