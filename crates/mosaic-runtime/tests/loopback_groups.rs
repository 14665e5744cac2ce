//! Loopback vendor groups with one thread per rank

use mosaic_interfaces::{GroupFactory, GroupRef, HostBuffer, Store, TensorLike};
use mosaic_rendezvous::{MemoryStore, PrefixStore};
use mosaic_runtime::{HostTensor, LoopbackBackend};
use mosaic_types::{CollectiveOptions, DeviceHandle, OpKind, ReduceOp, VendorKind};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

fn run_group<T, F>(vendor: VendorKind, size: usize, body: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(GroupRef) -> T + Send + Sync + 'static,
{
    let store: Arc<dyn Store> = Arc::new(PrefixStore::new(
        format!("{}-{}", vendor, size),
        Arc::new(MemoryStore::new()),
    ));
    let body = Arc::new(body);
    let handles: Vec<_> = (0..size)
        .map(|rank| {
            let store = store.clone();
            let body = body.clone();
            thread::spawn(move || {
                // Each rank owns its backend instance, as separate processes would
                let backend = LoopbackBackend::new(vendor);
                let group = backend.create_group(store, rank, size, TIMEOUT).unwrap();
                body(group)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn test_broadcast_replicates_root() {
    let results = run_group(VendorKind::Cuda, 4, |group| {
        let values = if group.rank() == 2 {
            vec![7i64, 8, 9]
        } else {
            vec![0i64; 3]
        };
        let tensor = HostTensor::from_vec(values, DeviceHandle::cuda(group.rank()))
            .unwrap()
            .into_ref();
        let work = group
            .broadcast(&[tensor.clone()], &CollectiveOptions::broadcast(2))
            .unwrap();
        assert!(work.wait(Some(TIMEOUT)));
        assert!(work.is_success().unwrap());
        tensor.to_host().unwrap()
    });

    for buffer in results {
        assert_eq!(buffer, HostBuffer::from(vec![7i64, 8, 9]));
    }
}

#[test]
fn test_allreduce_sum_and_avg() {
    let results = run_group(VendorKind::Mlu, 3, |group| {
        let base = (group.rank() + 1) as f32;
        let sum = HostTensor::from_vec(vec![base, base * 2.0], DeviceHandle::mlu(group.rank()))
            .unwrap()
            .into_ref();
        group
            .allreduce(&[sum.clone()], &CollectiveOptions::allreduce(ReduceOp::Sum))
            .unwrap();

        let avg = HostTensor::from_vec(vec![base as i32 * 3], DeviceHandle::mlu(group.rank()))
            .unwrap()
            .into_ref();
        group
            .allreduce(&[avg.clone()], &CollectiveOptions::allreduce(ReduceOp::Avg))
            .unwrap();

        (sum.to_host().unwrap(), avg.to_host().unwrap())
    });

    for (sum, avg) in results {
        assert_eq!(sum, HostBuffer::from(vec![6.0f32, 12.0]));
        assert_eq!(avg, HostBuffer::from(vec![6i32]));
    }
}

#[test]
fn test_allgather_fills_rank_slots() {
    let results = run_group(VendorKind::Cuda, 3, |group| {
        let device = DeviceHandle::cuda(group.rank());
        let input = HostTensor::from_vec(vec![group.rank() as i32; 2], device)
            .unwrap()
            .into_ref();
        let outputs: Vec<_> = (0..group.size())
            .map(|_| HostTensor::from_vec(vec![-1i32; 2], device).unwrap().into_ref())
            .collect();

        let work = group
            .allgather(&[outputs.clone()], &[input], &CollectiveOptions::default())
            .unwrap();
        assert_eq!(work.kind(), OpKind::Allgather);
        assert_eq!(work.result().unwrap().unwrap().len(), 3);

        outputs
            .iter()
            .map(|t| t.to_host().unwrap())
            .collect::<Vec<_>>()
    });

    for gathered in results {
        assert_eq!(
            gathered,
            vec![
                HostBuffer::from(vec![0i32, 0]),
                HostBuffer::from(vec![1i32, 1]),
                HostBuffer::from(vec![2i32, 2]),
            ]
        );
    }
}

#[test]
fn test_missing_rank_times_out_group_creation() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let backend = LoopbackBackend::new(VendorKind::Rocm);
    let err = backend
        .create_group(store, 0, 2, Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, mosaic_types::MosaicError::Timeout { .. }));
}
