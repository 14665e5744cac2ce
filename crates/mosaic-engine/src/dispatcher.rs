//! Heterogeneous collective dispatcher
//!
//! Each call resolves the device of its first tensor, delegates to that
//! vendor's sub-group, optionally stitches vendor results across domains over
//! the full-mesh transport, and publishes the outcome through a [`Work`]
//! handle:
//!
//! ```text
//! DispatchReceived -> VendorExecuting -> (CrossDomainReducing) -> Completed
//! ```
//!
//! There are no retries; any failure is terminal for the call.

use crate::context::BackendContext;
use crate::correction::{correct_host, ring_reduce_op, CorrectionStage};
use mosaic_interfaces::{CollectiveGroup, GroupRef, HostBuffer, TensorRef, Work};
use mosaic_rendezvous::{with_host_elements, MeshContext};
use mosaic_types::{CollectiveOptions, DeviceHandle, MosaicError, OpKind, Result, VendorKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Rank of the cross-domain participant whose data a broadcast replicates
pub const CROSS_DOMAIN_ROOT: usize = 0;

/// Implementation path of an operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Broadcast,
    Allreduce,
    Allgather,
    Unsupported,
}

/// Every declared operation and the path it takes
pub const DISPATCH_TABLE: [(OpKind, Route); 15] = [
    (OpKind::Broadcast, Route::Broadcast),
    (OpKind::Allreduce, Route::Allreduce),
    (OpKind::Allgather, Route::Allgather),
    (OpKind::AllreduceCoalesced, Route::Unsupported),
    (OpKind::Reduce, Route::Unsupported),
    (OpKind::Gather, Route::Unsupported),
    (OpKind::Scatter, Route::Unsupported),
    (OpKind::ReduceScatter, Route::Unsupported),
    (OpKind::Alltoall, Route::Unsupported),
    (OpKind::AlltoallBase, Route::Unsupported),
    (OpKind::Send, Route::Unsupported),
    (OpKind::Recv, Route::Unsupported),
    (OpKind::RecvAnysource, Route::Unsupported),
    (OpKind::Barrier, Route::Unsupported),
    (OpKind::AllgatherBase, Route::Unsupported),
];

pub fn route(op: OpKind) -> Route {
    DISPATCH_TABLE
        .iter()
        .find(|(kind, _)| *kind == op)
        .map(|(_, route)| *route)
        .unwrap_or(Route::Unsupported)
}

/// Per-call progress, logged at debug level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    DispatchReceived,
    VendorExecuting,
    CrossDomainReducing,
    Completed,
    Failed,
}

/// One logical collective call
#[derive(Debug, Clone)]
pub struct CollectiveRequest {
    pub op: OpKind,
    pub inputs: Vec<TensorRef>,
    /// Output lists for gather-style operations
    pub outputs: Vec<Vec<TensorRef>>,
    pub options: CollectiveOptions,
}

impl CollectiveRequest {
    pub fn new(op: OpKind, inputs: Vec<TensorRef>) -> Self {
        Self {
            op,
            inputs,
            outputs: Vec::new(),
            options: CollectiveOptions::default(),
        }
    }

    pub fn with_outputs(mut self, outputs: Vec<Vec<TensorRef>>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_options(mut self, options: CollectiveOptions) -> Self {
        self.options = options;
        self
    }
}

/// Process group spanning heterogeneous vendor sub-groups
#[derive(Debug)]
pub struct HeteroProcessGroup {
    rank: usize,
    size: usize,
    timeout: Duration,
    context: Arc<BackendContext>,
    vendor_groups: HashMap<VendorKind, GroupRef>,
    cross_domain: Option<Arc<MeshContext>>,
}

impl HeteroProcessGroup {
    pub fn new(
        rank: usize,
        size: usize,
        timeout: Duration,
        context: Arc<BackendContext>,
        vendor_groups: HashMap<VendorKind, GroupRef>,
        cross_domain: Option<Arc<MeshContext>>,
    ) -> Self {
        Self {
            rank,
            size,
            timeout,
            context,
            vendor_groups,
            cross_domain,
        }
    }

    /// Mesh context, held by local rank 0 of a cross-domain job only
    pub fn cross_domain(&self) -> Option<&Arc<MeshContext>> {
        self.cross_domain.as_ref()
    }

    pub fn context(&self) -> &Arc<BackendContext> {
        &self.context
    }

    pub fn vendors(&self) -> Vec<VendorKind> {
        let mut vendors: Vec<_> = self.vendor_groups.keys().copied().collect();
        vendors.sort();
        vendors
    }

    /// Route a request through the dispatch table
    pub fn dispatch(&self, request: &CollectiveRequest) -> Result<Work> {
        let op = request.op;
        match route(op) {
            Route::Broadcast => {
                self.check_stageable(op, &request.inputs)?;
                self.run(op, &request.inputs, |device, group| {
                    self.broadcast_stages(device, group, &request.inputs, &request.options)
                })
            }
            Route::Allreduce => {
                self.check_stageable(op, &request.inputs)?;
                self.run(op, &request.inputs, |device, group| {
                    self.allreduce_stages(device, group, &request.inputs, &request.options)
                })
            }
            Route::Allgather => {
                self.validate_allgather(&request.outputs, &request.inputs)?;
                self.run(op, &request.inputs, |device, group| {
                    self.allgather_stages(
                        device,
                        group,
                        &request.outputs,
                        &request.inputs,
                        &request.options,
                    )
                })
            }
            Route::Unsupported => {
                debug!("Rejecting unsupported operation `{}`", op);
                Err(MosaicError::unsupported_operation(op))
            }
        }
    }

    /// Shared call envelope: resolve device and sub-group, run the stages,
    /// settle the work handle.
    fn run<F>(&self, op: OpKind, inputs: &[TensorRef], stages: F) -> Result<Work>
    where
        F: FnOnce(DeviceHandle, &GroupRef) -> Result<Vec<TensorRef>>,
    {
        let device = inputs
            .first()
            .map(|t| t.device())
            .ok_or_else(|| MosaicError::shape_mismatch(op, "empty tensor list"))?;
        if let Some((index, stray)) = inputs
            .iter()
            .enumerate()
            .find(|(_, t)| t.device() != device)
        {
            return Err(MosaicError::shape_mismatch(
                op,
                format!(
                    "tensor {} is on {}, tensor 0 is on {}",
                    index,
                    stray.device(),
                    device
                ),
            ));
        }
        debug!("`{}` on {}: {:?}", op, device, DispatchState::DispatchReceived);

        let (promise, work) = Work::pending(op, device);
        let outcome = self
            .vendor_groups
            .get(&device.vendor)
            .ok_or_else(|| MosaicError::no_device_available(op, device))
            .and_then(|group| stages(device, group));

        match outcome {
            Ok(outputs) => {
                promise.succeed(outputs)?;
                debug!("`{}` on {}: {:?}", op, device, DispatchState::Completed);
                Ok(work)
            }
            Err(e) => {
                warn!("`{}` on {} failed: {}", op, device, e);
                debug!("`{}` on {}: {:?}", op, device, DispatchState::Failed);
                promise.fail(e.clone())?;
                Err(e)
            }
        }
    }

    fn call_timeout(&self, opts: &CollectiveOptions) -> Duration {
        opts.timeout.unwrap_or(self.timeout)
    }

    /// Block on a vendor work handle and attribute any failure to the vendor
    fn await_vendor(
        &self,
        op: OpKind,
        device: DeviceHandle,
        issued: Result<Work>,
        timeout: Duration,
    ) -> Result<Vec<TensorRef>> {
        let work = issued.map_err(|e| vendor_failure(op, device, e))?;
        if !work.wait(Some(timeout)) {
            return Err(MosaicError::vendor_delegate(
                op,
                device,
                format!("no completion within {:?}", timeout),
            ));
        }
        match work.result() {
            Some(Ok(outputs)) => Ok(outputs),
            Some(Err(e)) => Err(vendor_failure(op, device, e)),
            None => Err(MosaicError::internal("completed work holds no result")),
        }
    }

    fn cross_domain_configured(&self) -> bool {
        self.context.config().is_cross_domain()
    }

    /// Reject dtypes the cross-domain stage cannot stage through host memory.
    ///
    /// Every rank of every domain decides this from the same inputs, so no
    /// rank enters the mesh while its peers bail out.
    fn check_stageable(&self, op: OpKind, inputs: &[TensorRef]) -> Result<()> {
        if !self.cross_domain_configured() {
            return Ok(());
        }
        match inputs.iter().find(|t| !HostBuffer::supports(t.dtype())) {
            Some(tensor) => {
                debug!("`{}` rejects {} before the cross-domain stage", op, tensor.dtype());
                Err(MosaicError::unsupported_dtype(tensor.dtype()))
            }
            None => Ok(()),
        }
    }

    /// Replicate local rank 0's tensors across the vendor sub-group
    fn rebroadcast_local(
        &self,
        op: OpKind,
        device: DeviceHandle,
        group: &GroupRef,
        tensors: &[TensorRef],
        timeout: Duration,
    ) -> Result<()> {
        if !self.cross_domain_configured() || !self.context.config().rebroadcast_after_cross_domain {
            return Ok(());
        }
        let opts = CollectiveOptions::broadcast(0).with_timeout(timeout);
        self.await_vendor(op, device, group.broadcast(tensors, &opts), timeout)?;
        debug!("`{}` on {}: re-broadcast from local rank 0", op, device);
        Ok(())
    }

    fn broadcast_stages(
        &self,
        device: DeviceHandle,
        group: &GroupRef,
        tensors: &[TensorRef],
        opts: &CollectiveOptions,
    ) -> Result<Vec<TensorRef>> {
        let op = OpKind::Broadcast;
        let timeout = self.call_timeout(opts);

        debug!("`{}` on {}: {:?}", op, device, DispatchState::VendorExecuting);
        let outputs = self.await_vendor(op, device, group.broadcast(tensors, opts), timeout)?;

        if let Some(mesh) = &self.cross_domain {
            debug!("`{}` on {}: {:?}", op, device, DispatchState::CrossDomainReducing);
            for tensor in tensors {
                let mut staged = tensor.to_host()?;
                with_host_elements!(&mut staged, |values| mesh
                    .broadcast_one_to_all(values, CROSS_DOMAIN_ROOT))?;
                tensor.copy_from_host(&staged)?;
            }
        }

        self.rebroadcast_local(op, device, group, tensors, timeout)?;
        Ok(outputs)
    }

    fn allreduce_stages(
        &self,
        device: DeviceHandle,
        group: &GroupRef,
        tensors: &[TensorRef],
        opts: &CollectiveOptions,
    ) -> Result<Vec<TensorRef>> {
        let op = OpKind::Allreduce;
        let timeout = self.call_timeout(opts);

        debug!("`{}` on {}: {:?}", op, device, DispatchState::VendorExecuting);
        let outputs = self.await_vendor(op, device, group.allreduce(tensors, opts), timeout)?;

        if let Some(mesh) = &self.cross_domain {
            debug!("`{}` on {}: {:?}", op, device, DispatchState::CrossDomainReducing);
            let policy = self.context.config().mean_correction;
            let divisor = mesh.world_size();
            let ring_op = ring_reduce_op(policy, opts.reduce_op);

            for tensor in tensors {
                let mut staged = tensor.to_host()?;
                correct_host(
                    &mut staged,
                    policy,
                    CorrectionStage::BeforeRing,
                    opts.reduce_op,
                    divisor,
                );
                with_host_elements!(&mut staged, |values| mesh.allreduce_ring(values, ring_op))?;
                correct_host(
                    &mut staged,
                    policy,
                    CorrectionStage::AfterRing,
                    opts.reduce_op,
                    divisor,
                );
                tensor.copy_from_host(&staged)?;
            }
        }

        self.rebroadcast_local(op, device, group, tensors, timeout)?;
        Ok(outputs)
    }

    /// Check allgather lists before anything is written
    fn validate_allgather(&self, outputs: &[Vec<TensorRef>], inputs: &[TensorRef]) -> Result<()> {
        let op = OpKind::Allgather;
        if inputs.is_empty() {
            return Err(MosaicError::shape_mismatch(op, "empty tensor list"));
        }
        if outputs.len() != inputs.len() {
            return Err(MosaicError::shape_mismatch(
                op,
                format!(
                    "{} output list(s) for {} input tensor(s)",
                    outputs.len(),
                    inputs.len()
                ),
            ));
        }

        for (index, (list, input)) in outputs.iter().zip(inputs).enumerate() {
            if list.len() != self.size {
                return Err(MosaicError::shape_mismatch(
                    op,
                    format!(
                        "output list {} has {} tensor(s), world size is {}",
                        index,
                        list.len(),
                        self.size
                    ),
                ));
            }
            for (slot, output) in list.iter().enumerate() {
                if output.numel() != input.numel()
                    || output.dtype() != input.dtype()
                    || output.device() != input.device()
                {
                    return Err(MosaicError::shape_mismatch(
                        op,
                        format!(
                            "output[{}][{}] is {:?} {} on {}, input {} is {:?} {} on {}",
                            index,
                            slot,
                            output.shape(),
                            output.dtype(),
                            output.device(),
                            index,
                            input.shape(),
                            input.dtype(),
                            input.device()
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn allgather_stages(
        &self,
        device: DeviceHandle,
        group: &GroupRef,
        outputs: &[Vec<TensorRef>],
        inputs: &[TensorRef],
        opts: &CollectiveOptions,
    ) -> Result<Vec<TensorRef>> {
        let op = OpKind::Allgather;
        debug!("`{}` on {}: {:?}", op, device, DispatchState::VendorExecuting);
        self.await_vendor(
            op,
            device,
            group.allgather(outputs, inputs, opts),
            self.call_timeout(opts),
        )
    }

    // ========================================================================
    // Declared operations without an implementation path
    // ========================================================================

    fn reject(&self, op: OpKind, inputs: &[TensorRef]) -> Result<Work> {
        self.dispatch(&CollectiveRequest::new(op, inputs.to_vec()))
    }

    pub fn allreduce_coalesced(&self, tensors: &[TensorRef], _opts: &CollectiveOptions) -> Result<Work> {
        self.reject(OpKind::AllreduceCoalesced, tensors)
    }

    pub fn reduce(&self, tensors: &[TensorRef], _opts: &CollectiveOptions) -> Result<Work> {
        self.reject(OpKind::Reduce, tensors)
    }

    pub fn gather(
        &self,
        _outputs: &[Vec<TensorRef>],
        inputs: &[TensorRef],
        _opts: &CollectiveOptions,
    ) -> Result<Work> {
        self.reject(OpKind::Gather, inputs)
    }

    pub fn scatter(
        &self,
        outputs: &[TensorRef],
        _inputs: &[Vec<TensorRef>],
        _opts: &CollectiveOptions,
    ) -> Result<Work> {
        self.reject(OpKind::Scatter, outputs)
    }

    pub fn reduce_scatter(
        &self,
        outputs: &[TensorRef],
        _inputs: &[Vec<TensorRef>],
        _opts: &CollectiveOptions,
    ) -> Result<Work> {
        self.reject(OpKind::ReduceScatter, outputs)
    }

    pub fn alltoall(
        &self,
        outputs: &[TensorRef],
        _inputs: &[TensorRef],
        _opts: &CollectiveOptions,
    ) -> Result<Work> {
        self.reject(OpKind::Alltoall, outputs)
    }

    pub fn alltoall_base(
        &self,
        output: &TensorRef,
        _input: &TensorRef,
        _output_split_sizes: &[usize],
        _input_split_sizes: &[usize],
        _opts: &CollectiveOptions,
    ) -> Result<Work> {
        self.reject(OpKind::AlltoallBase, std::slice::from_ref(output))
    }

    pub fn send(&self, tensors: &[TensorRef], _dst_rank: usize, _tag: i32) -> Result<Work> {
        self.reject(OpKind::Send, tensors)
    }

    pub fn recv(&self, tensors: &[TensorRef], _src_rank: usize, _tag: i32) -> Result<Work> {
        self.reject(OpKind::Recv, tensors)
    }

    pub fn recv_anysource(&self, tensors: &[TensorRef], _tag: i32) -> Result<Work> {
        self.reject(OpKind::RecvAnysource, tensors)
    }

    pub fn barrier(&self, _opts: &CollectiveOptions) -> Result<Work> {
        self.reject(OpKind::Barrier, &[])
    }

    pub fn allgather_base(
        &self,
        output: &TensorRef,
        _input: &TensorRef,
        _opts: &CollectiveOptions,
    ) -> Result<Work> {
        self.reject(OpKind::AllgatherBase, std::slice::from_ref(output))
    }
}

/// Attribute a vendor-side failure to the operation and device, keeping
/// shape errors and already-attributed failures as they are
fn vendor_failure(op: OpKind, device: DeviceHandle, err: MosaicError) -> MosaicError {
    match err {
        MosaicError::ShapeMismatch { .. } | MosaicError::VendorDelegate { .. } => err,
        other => MosaicError::vendor_delegate(op, device, other.to_string()),
    }
}

impl CollectiveGroup for HeteroProcessGroup {
    fn backend_name(&self) -> &str {
        "mosaic"
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast(&self, tensors: &[TensorRef], opts: &CollectiveOptions) -> Result<Work> {
        self.dispatch(
            &CollectiveRequest::new(OpKind::Broadcast, tensors.to_vec()).with_options(opts.clone()),
        )
    }

    fn allreduce(&self, tensors: &[TensorRef], opts: &CollectiveOptions) -> Result<Work> {
        self.dispatch(
            &CollectiveRequest::new(OpKind::Allreduce, tensors.to_vec()).with_options(opts.clone()),
        )
    }

    fn allgather(
        &self,
        outputs: &[Vec<TensorRef>],
        inputs: &[TensorRef],
        opts: &CollectiveOptions,
    ) -> Result<Work> {
        self.dispatch(
            &CollectiveRequest::new(OpKind::Allgather, inputs.to_vec())
                .with_outputs(outputs.to_vec())
                .with_options(opts.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_table_is_closed() {
        assert_eq!(DISPATCH_TABLE.len(), OpKind::ALL.len());
        for op in OpKind::ALL {
            assert!(DISPATCH_TABLE.iter().any(|(kind, _)| *kind == op));
        }

        let supported: Vec<_> = DISPATCH_TABLE
            .iter()
            .filter(|(_, route)| *route != Route::Unsupported)
            .map(|(op, _)| *op)
            .collect();
        assert_eq!(
            supported,
            vec![OpKind::Broadcast, OpKind::Allreduce, OpKind::Allgather]
        );
    }

    #[test]
    fn test_vendor_failure_attribution() {
        let device = DeviceHandle::cuda(1);
        let wrapped = vendor_failure(OpKind::Allreduce, device, MosaicError::device("ecc error"));
        assert!(matches!(wrapped, MosaicError::VendorDelegate { .. }));
        assert!(wrapped.to_string().contains("cuda:1"));

        let shape = MosaicError::shape_mismatch(OpKind::Allreduce, "ragged");
        assert_eq!(vendor_failure(OpKind::Allreduce, device, shape.clone()), shape);
    }
}
