//! Multi-rank transport tests; each rank runs on its own thread over loopback TCP

use mosaic_interfaces::Store;
use mosaic_rendezvous::{FileStore, MemoryStore, MeshContext, PrefixStore, ReduceOp};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(20);

/// Run `body` on `world_size` ranks that share one store, collecting results by rank
fn run_ranks<T, F>(world_size: usize, store: Arc<dyn Store>, body: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(MeshContext) -> T + Send + Sync + 'static,
{
    run_ranks_with_timeout(world_size, store, TIMEOUT, body)
}

fn run_ranks_with_timeout<T, F>(
    world_size: usize,
    store: Arc<dyn Store>,
    timeout: Duration,
    body: F,
) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(MeshContext) -> T + Send + Sync + 'static,
{
    let body = Arc::new(body);
    let handles: Vec<_> = (0..world_size)
        .map(|rank| {
            let store = store.clone();
            let body = body.clone();
            thread::spawn(move || {
                let mesh = MeshContext::connect(rank, world_size, "127.0.0.1:0", store, timeout)
                    .expect("mesh formation");
                body(mesh)
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank thread panicked"))
        .collect()
}

#[test]
fn test_broadcast_int32_four_ranks() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let results = run_ranks(4, store, |mesh| {
        let mut buffer = if mesh.rank() == 0 {
            vec![1i32, 2, 3]
        } else {
            vec![0i32; 3]
        };
        mesh.broadcast_one_to_all(&mut buffer, 0).unwrap();
        buffer
    });

    for buffer in results {
        assert_eq!(buffer, vec![1, 2, 3]);
    }
}

#[test]
fn test_broadcast_from_non_zero_root() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let results = run_ranks(3, store, |mesh| {
        let mut buffer = vec![mesh.rank() as f64; 2];
        mesh.broadcast_one_to_all(&mut buffer, 2).unwrap();
        buffer
    });

    for buffer in results {
        assert_eq!(buffer, vec![2.0, 2.0]);
    }
}

#[test]
fn test_ring_sum_float32_four_ranks() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let results = run_ranks(4, store, |mesh| {
        let mut buffer = vec![(mesh.rank() + 1) as f32; 7];
        mesh.allreduce_ring(&mut buffer, ReduceOp::Sum).unwrap();
        buffer
    });

    for buffer in results {
        assert_eq!(buffer, vec![10.0f32; 7]);
    }
}

#[test]
fn test_ring_handles_fewer_elements_than_ranks() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let results = run_ranks(4, store, |mesh| {
        let mut buffer = vec![mesh.rank() as i64 * 10, 1];
        mesh.allreduce_ring(&mut buffer, ReduceOp::Max).unwrap();
        buffer
    });

    for buffer in results {
        assert_eq!(buffer, vec![30, 1]);
    }
}

#[test]
fn test_ring_product_and_avg() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let results = run_ranks(2, store, |mesh| {
        let mut product = vec![(mesh.rank() + 2) as i32; 5];
        mesh.allreduce_ring(&mut product, ReduceOp::Product).unwrap();

        let mut avg = vec![(mesh.rank() * 4) as f64; 3];
        mesh.allreduce_ring(&mut avg, ReduceOp::Avg).unwrap();

        let report = mesh.stats().report();
        (product, avg, report)
    });

    for (product, avg, report) in results {
        assert_eq!(product, vec![6; 5]);
        assert_eq!(avg, vec![2.0; 3]);
        assert!(report.contains("allreduce_ring"));
    }
}

#[test]
fn test_mesh_over_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let file_store: Arc<dyn Store> = Arc::new(FileStore::new(dir.path()).unwrap());
    let store: Arc<dyn Store> = Arc::new(PrefixStore::new("job-7", file_store));

    let results = run_ranks(3, store, |mesh| {
        let mut buffer = vec![1i32, mesh.rank() as i32];
        mesh.allreduce_ring(&mut buffer, ReduceOp::Sum).unwrap();
        (mesh.world_size(), buffer)
    });

    for (world, buffer) in results {
        assert_eq!(world, 3);
        assert_eq!(buffer, vec![3, 3]);
    }
}

#[test]
fn test_repeated_collectives_keep_order() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let results = run_ranks(3, store, |mesh| {
        let mut sums = Vec::new();
        for round in 0..5 {
            let mut buffer = vec![round + mesh.rank() as i64; 4];
            mesh.allreduce_ring(&mut buffer, ReduceOp::Sum).unwrap();
            sums.push(buffer[0]);
        }
        sums
    });

    for sums in results {
        assert_eq!(sums, vec![3, 6, 9, 12, 15]);
    }
}

#[test]
fn test_unbounded_formation_timeout() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let results = run_ranks_with_timeout(3, store, Duration::MAX, |mesh| {
        let mut buffer = vec![mesh.rank() as i32 + 1];
        mesh.allreduce_ring(&mut buffer, ReduceOp::Sum).unwrap();
        buffer
    });

    for buffer in results {
        assert_eq!(buffer, vec![6]);
    }
}
