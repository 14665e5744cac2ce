//! Dispatch table, validation and failure surfacing on single-domain groups

mod common;

use common::{context, init_test_env, probe, single_rank_group, tensor, TIMEOUT};
use mosaic_engine::{
    CollectiveRequest, HeteroGroupFactory, MosaicError, OpKind, Route, DISPATCH_TABLE,
};
use mosaic_interfaces::{CollectiveGroup, HostBuffer, Store, TensorLike, TensorRef};
use mosaic_rendezvous::MemoryStore;
use mosaic_runtime::{LoopbackBackend, VendorRegistry};
use mosaic_types::{BackendConfig, CollectiveOptions, DeviceHandle, ReduceOp, VendorKind};
use std::sync::Arc;
use std::thread;

#[test]
fn test_every_unsupported_operation_is_rejected_by_name() {
    let group = single_rank_group(VendorKind::Cuda);
    let input = tensor(vec![1.0f32], DeviceHandle::cuda(0));

    let unsupported: Vec<_> = DISPATCH_TABLE
        .iter()
        .filter(|(_, route)| *route == Route::Unsupported)
        .map(|(op, _)| *op)
        .collect();
    assert_eq!(unsupported.len(), 12);

    for op in unsupported {
        let err = group
            .dispatch(&CollectiveRequest::new(op, vec![input.clone()]))
            .unwrap_err();
        assert_eq!(err, MosaicError::UnsupportedOperation { op });
        assert!(err.to_string().contains(op.name()));
    }
}

#[test]
fn test_named_unsupported_methods() {
    let group = single_rank_group(VendorKind::Cuda);
    let input = tensor(vec![1i32, 2], DeviceHandle::cuda(0));
    let opts = CollectiveOptions::default();
    let inputs = [input.clone()];

    let results = [
        (OpKind::Barrier, group.barrier(&opts)),
        (OpKind::Reduce, group.reduce(&inputs, &opts)),
        (OpKind::Send, group.send(&inputs, 0, 0)),
        (OpKind::RecvAnysource, group.recv_anysource(&inputs, 0)),
        (OpKind::AllgatherBase, group.allgather_base(&input, &input, &opts)),
        (
            OpKind::AlltoallBase,
            group.alltoall_base(&input, &input, &[], &[], &opts),
        ),
    ];
    for (op, result) in results {
        assert_eq!(result.unwrap_err().operation(), Some(op));
    }

    // Nothing was touched
    assert_eq!(input.to_host().unwrap(), HostBuffer::from(vec![1i32, 2]));
}

#[test]
fn test_single_rank_supported_operations() {
    let group = single_rank_group(VendorKind::Mlu);
    assert_eq!(group.backend_name(), "mosaic");
    assert_eq!(group.size(), 1);
    assert!(group.cross_domain().is_none());

    let values = tensor(vec![4.0f64, 5.0], DeviceHandle::mlu(0));
    let work = group
        .allreduce(&[values.clone()], &CollectiveOptions::allreduce(ReduceOp::Sum))
        .unwrap();
    assert!(work.is_completed());
    assert!(work.is_success().unwrap());
    assert_eq!(work.kind(), OpKind::Allreduce);
    assert_eq!(work.device(), DeviceHandle::mlu(0));
    assert_eq!(values.to_host().unwrap(), HostBuffer::from(vec![4.0f64, 5.0]));

    let work = group
        .broadcast(&[values.clone()], &CollectiveOptions::broadcast(0))
        .unwrap();
    assert_eq!(work.wait_result(Some(TIMEOUT)).unwrap().len(), 1);
}

#[test]
fn test_empty_tensor_list_is_shape_error() {
    let group = single_rank_group(VendorKind::Cuda);
    let err = group
        .allreduce(&[], &CollectiveOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        MosaicError::ShapeMismatch {
            op: OpKind::Allreduce,
            ..
        }
    ));
}

#[test]
fn test_device_without_sub_group() {
    let group = single_rank_group(VendorKind::Cuda);
    let foreign = tensor(vec![1.0f32], DeviceHandle::mlu(0));
    let err = group
        .allreduce(&[foreign], &CollectiveOptions::default())
        .unwrap_err();
    assert!(matches!(err, MosaicError::NoDeviceAvailable { .. }));
    assert!(err.to_string().contains("mlu:0"));
}

#[test]
fn test_allgather_length_mismatch_writes_nothing() {
    let group = single_rank_group(VendorKind::Cuda);
    let device = DeviceHandle::cuda(0);
    let input = tensor(vec![9i64, 9], device);
    let sentinel = || tensor(vec![-1i64, -1], device);

    // Two output slots for a one-rank group
    let outputs = vec![vec![sentinel(), sentinel()]];
    let err = group
        .allgather(&outputs, &[input.clone()], &CollectiveOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        MosaicError::ShapeMismatch {
            op: OpKind::Allgather,
            ..
        }
    ));
    for output in outputs.iter().flatten() {
        assert_eq!(output.to_host().unwrap(), HostBuffer::from(vec![-1i64, -1]));
    }

    // Output list count differs from input count
    let err = group
        .allgather(&[], &[input.clone()], &CollectiveOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("0 output list(s)"));

    // Element count differs
    let short = vec![vec![tensor(vec![-1i64], device)]];
    assert!(group
        .allgather(&short, &[input.clone()], &CollectiveOptions::default())
        .is_err());
    assert_eq!(short[0][0].to_host().unwrap(), HostBuffer::from(vec![-1i64]));

    // Placement differs
    let elsewhere = vec![vec![tensor(vec![-1i64, -1], DeviceHandle::cuda(3))]];
    assert!(group
        .allgather(&elsewhere, &[input], &CollectiveOptions::default())
        .is_err());
}

#[test]
fn test_allgather_across_local_ranks() {
    init_test_env();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let handles: Vec<_> = (0..3)
        .map(|rank| {
            let store = store.clone();
            thread::spawn(move || {
                let context = context(
                    BackendConfig::default(),
                    vec![probe(VendorKind::Cuda, 3)],
                    VendorRegistry::with_loopback(&[VendorKind::Cuda]),
                );
                let group = HeteroGroupFactory::new(context)
                    .create(store, rank, 3, TIMEOUT)
                    .unwrap();

                let device = DeviceHandle::cuda(rank);
                let input = tensor(vec![rank as i32 * 10, rank as i32 * 10 + 1], device);
                let outputs: Vec<Vec<TensorRef>> =
                    vec![(0..3).map(|_| tensor(vec![0i32, 0], device)).collect()];
                let work = group
                    .allgather(&outputs, &[input], &CollectiveOptions::default())
                    .unwrap();
                assert!(work.is_success().unwrap());
                outputs[0]
                    .iter()
                    .map(|t| t.to_host().unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        let gathered = handle.join().unwrap();
        assert_eq!(
            gathered,
            vec![
                HostBuffer::from(vec![0i32, 1]),
                HostBuffer::from(vec![10i32, 11]),
                HostBuffer::from(vec![20i32, 21]),
            ]
        );
    }
}

#[test]
fn test_vendor_failure_is_attributed() {
    init_test_env();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let handles: Vec<_> = (0..2)
        .map(|rank| {
            let store = store.clone();
            thread::spawn(move || {
                let backend = Arc::new(LoopbackBackend::new(VendorKind::Cuda));
                backend.inject_failure(OpKind::Allreduce, "uncorrectable ECC error");
                let vendors = VendorRegistry::new();
                vendors.register(backend);

                let context = context(
                    BackendConfig::default(),
                    vec![probe(VendorKind::Cuda, 2)],
                    vendors,
                );
                let group = HeteroGroupFactory::new(context)
                    .create(store, rank, 2, TIMEOUT)
                    .unwrap();
                group
                    .allreduce(
                        &[tensor(vec![1.0f32], DeviceHandle::cuda(rank))],
                        &CollectiveOptions::default(),
                    )
                    .unwrap_err()
            })
        })
        .collect();

    for (rank, handle) in handles.into_iter().enumerate() {
        let err = handle.join().unwrap();
        match &err {
            MosaicError::VendorDelegate { op, device, message } => {
                assert_eq!(*op, OpKind::Allreduce);
                assert_eq!(*device, DeviceHandle::cuda(rank));
                assert!(message.contains("ECC"));
            }
            other => panic!("expected vendor failure, got {other:?}"),
        }
    }
}

#[test]
fn test_zero_probes_fail_cleanly() {
    init_test_env();
    let context = context(BackendConfig::default(), Vec::new(), VendorRegistry::new());
    assert_eq!(context.init(), 0);

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let err = HeteroGroupFactory::new(context)
        .create(store, 0, 1, TIMEOUT)
        .unwrap_err();
    assert!(matches!(err, MosaicError::NoDeviceAvailable { .. }));
}

#[test]
fn test_devices_without_library_are_rejected() {
    init_test_env();
    let context = context(
        BackendConfig::default(),
        vec![probe(VendorKind::Rocm, 1)],
        VendorRegistry::with_loopback(&[VendorKind::Cuda]),
    );
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let err = HeteroGroupFactory::new(context)
        .create(store, 0, 1, TIMEOUT)
        .unwrap_err();
    assert!(matches!(err, MosaicError::NoDeviceAvailable { .. }));
}

#[tokio::test]
async fn test_work_handle_can_be_awaited() {
    let group = single_rank_group(VendorKind::Cuda);
    let t = tensor(vec![2.0f32, 4.0], DeviceHandle::cuda(0));
    let work = group
        .allreduce(&[t.clone()], &CollectiveOptions::allreduce(ReduceOp::Avg))
        .unwrap();

    let outputs = work.future().await.unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].to_host().unwrap(), HostBuffer::from(vec![2.0f32, 4.0]));
}

#[test]
fn test_mixed_devices_are_rejected() {
    let group = single_rank_group(VendorKind::Cuda);
    let first = tensor(vec![1.0f32], DeviceHandle::cuda(0));
    let second = tensor(vec![2.0f32], DeviceHandle::cuda(1));
    let err = group
        .allreduce(&[first.clone(), second], &CollectiveOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("tensor 1 is on cuda:1"));
    assert_eq!(first.to_host().unwrap(), HostBuffer::from(vec![1.0f32]));
}

#[test]
fn test_unbounded_call_timeout() {
    let group = single_rank_group(VendorKind::Cuda);
    let t = tensor(vec![3i32], DeviceHandle::cuda(0));
    let opts = CollectiveOptions::allreduce(ReduceOp::Sum).with_timeout(std::time::Duration::MAX);
    let work = group.allreduce(&[t.clone()], &opts).unwrap();
    assert_eq!(work.wait_result(Some(std::time::Duration::MAX)).unwrap().len(), 1);
    assert_eq!(t.to_host().unwrap(), HostBuffer::from(vec![3i32]));
}

#[test]
fn test_half_precision_left_to_vendor_without_cross_domain() {
    let group = single_rank_group(VendorKind::Cuda);
    let half = common::HalfTensor::new(2, DeviceHandle::cuda(0));
    // No mesh stage, so the vendor library is the one that refuses
    let err = group
        .allreduce(&[half], &CollectiveOptions::default())
        .unwrap_err();
    assert!(matches!(err, MosaicError::VendorDelegate { .. }));
}
