//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use mosaic_engine::{BackendContext, DeviceRegistry, HeteroGroupFactory, HeteroProcessGroup};
use mosaic_interfaces::{DeviceProbe, HostBuffer, Store, TensorLike, TensorRef};
use mosaic_rendezvous::MemoryStore;
use mosaic_runtime::{HostTensor, StaticProbe, VendorRegistry};
use mosaic_types::{
    BackendConfig, DataType, DeviceHandle, MosaicError, RendezvousConfig, Result, VendorKind,
};
use std::sync::{Arc, Once};
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(10);

static TEST_INIT: Once = Once::new();

/// Install a quiet test-writer subscriber once per test binary
pub fn init_test_env() {
    TEST_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("error")
            .with_test_writer()
            .try_init();
    });
}

/// Probe reporting `count` healthy devices of `vendor`
pub fn probe(vendor: VendorKind, count: usize) -> Arc<dyn DeviceProbe> {
    let probe = (0..count).fold(StaticProbe::new(vendor), |probe, _| {
        probe.with_healthy("test accelerator", 16 << 30)
    });
    Arc::new(probe)
}

pub fn context(
    config: BackendConfig,
    probes: Vec<Arc<dyn DeviceProbe>>,
    vendors: VendorRegistry,
) -> Arc<BackendContext> {
    Arc::new(BackendContext::new(
        config,
        DeviceRegistry::with_probes(probes),
        vendors,
    ))
}

/// Cross-domain section for participant `rank` of `world_size`
pub fn cross_domain(rank: usize, world_size: usize) -> RendezvousConfig {
    RendezvousConfig {
        rank,
        world_size,
        transport_addr: "127.0.0.1:0".to_string(),
        store_path: std::env::temp_dir().join("mosaic-engine-tests"),
        connect_timeout_secs: 10,
    }
}

/// One-rank group over a loopback library for `vendor`
pub fn single_rank_group(vendor: VendorKind) -> Arc<HeteroProcessGroup> {
    init_test_env();
    let context = context(
        BackendConfig::default(),
        vec![probe(vendor, 1)],
        VendorRegistry::with_loopback(&[vendor]),
    );
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    HeteroGroupFactory::new(context)
        .create(store, 0, 1, TIMEOUT)
        .unwrap()
}

pub fn tensor<T>(values: Vec<T>, device: DeviceHandle) -> TensorRef
where
    Vec<T>: Into<HostBuffer>,
{
    HostTensor::from_vec(values, device).unwrap().into_ref()
}

/// Half-precision tensor with no host staging path
#[derive(Debug)]
pub struct HalfTensor {
    shape: Vec<usize>,
    device: DeviceHandle,
}

impl HalfTensor {
    pub fn new(len: usize, device: DeviceHandle) -> TensorRef {
        Arc::new(Self {
            shape: vec![len],
            device,
        })
    }
}

impl TensorLike for HalfTensor {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DataType {
        DataType::F16
    }

    fn device(&self) -> DeviceHandle {
        self.device
    }

    fn to_host(&self) -> Result<HostBuffer> {
        Err(MosaicError::unsupported_dtype(DataType::F16))
    }

    fn copy_from_host(&self, _buffer: &HostBuffer) -> Result<()> {
        Err(MosaicError::unsupported_dtype(DataType::F16))
    }
}
