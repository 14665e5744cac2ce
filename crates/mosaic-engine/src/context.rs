//! Process-wide backend state
//!
//! Configuration, discovered devices and registered vendor backends live in
//! one explicit [`BackendContext`] that groups are built from.

use crate::registry::DeviceRegistry;
use crate::scheduler::Scheduler;
use mosaic_interfaces::DeviceProbe;
use mosaic_runtime::VendorRegistry;
use mosaic_types::{BackendConfig, MosaicError, Result};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{error, info};

/// Configuration, device inventory and vendor capability set of one process
#[derive(Debug)]
pub struct BackendContext {
    config: BackendConfig,
    registry: DeviceRegistry,
    scheduler: Scheduler,
    vendors: VendorRegistry,
    discovered: OnceCell<usize>,
}

impl BackendContext {
    pub fn new(config: BackendConfig, registry: DeviceRegistry, vendors: VendorRegistry) -> Self {
        Self {
            config,
            registry,
            scheduler: Scheduler::new(),
            vendors,
            discovered: OnceCell::new(),
        }
    }

    /// Context configured from `MOSAIC_*` environment variables
    pub fn from_env(probes: Vec<Arc<dyn DeviceProbe>>, vendors: VendorRegistry) -> Result<Self> {
        let config = BackendConfig::from_env()?;
        Ok(Self::new(config, DeviceRegistry::with_probes(probes), vendors))
    }

    /// Discover devices and return the world size.
    ///
    /// Discovery runs once; later calls return the recorded size without
    /// touching the scheduler. Zero means no usable device and is logged as
    /// an error.
    pub fn init(&self) -> usize {
        *self.discovered.get_or_init(|| {
            for device in self.registry.discover() {
                self.scheduler.add_device(device);
            }
            let world_size = self.scheduler.world_size();
            if world_size == 0 {
                error!("No usable device found; the backend cannot form groups");
            } else {
                info!(
                    "Backend initialized with world size {} ({})",
                    world_size,
                    if self.config.is_cross_domain() {
                        "cross-domain"
                    } else {
                        "vendor-only"
                    }
                );
            }
            world_size
        })
    }

    /// Like [`init`](Self::init), but zero devices is an error
    pub fn require_devices(&self) -> Result<usize> {
        match self.init() {
            0 => Err(MosaicError::no_devices(format!(
                "discovery across {} vendor probe(s) found no usable device",
                self.registry.probe_count()
            ))),
            world_size => Ok(world_size),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.discovered.get().is_some()
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn vendors(&self) -> &VendorRegistry {
        &self.vendors
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Number of cross-domain participants, when the stage is configured
    pub fn cross_domain_world_size(&self) -> Option<usize> {
        self.config.rendezvous.as_ref().map(|r| r.world_size)
    }

    pub fn global_rank(&self, local_rank: usize) -> Result<usize> {
        self.config.global_rank(local_rank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_runtime::StaticProbe;
    use mosaic_types::VendorKind;

    #[test]
    fn test_init_runs_discovery_once() {
        let probe = StaticProbe::new(VendorKind::Mlu)
            .with_healthy("MLU370-X8", 48 << 30)
            .with_healthy("MLU370-X8", 48 << 30);
        let context = BackendContext::new(
            BackendConfig::default(),
            DeviceRegistry::with_probes(vec![Arc::new(probe)]),
            VendorRegistry::new(),
        );

        assert!(!context.is_initialized());
        assert_eq!(context.init(), 2);
        assert_eq!(context.init(), 2);
        assert_eq!(context.scheduler().world_size(), 2);
        assert_eq!(context.require_devices().unwrap(), 2);
    }

    #[test]
    fn test_zero_probes_is_clean_failure() {
        let context = BackendContext::new(
            BackendConfig::default(),
            DeviceRegistry::new(),
            VendorRegistry::new(),
        );
        assert_eq!(context.init(), 0);
        let err = context.require_devices().unwrap_err();
        assert!(matches!(err, MosaicError::NoDeviceAvailable { .. }));
    }

    #[test]
    fn test_concurrent_init_discovers_once() {
        let probe = StaticProbe::new(VendorKind::Cuda).with_healthy("A100", 40 << 30);
        let context = Arc::new(BackendContext::new(
            BackendConfig::default(),
            DeviceRegistry::with_probes(vec![Arc::new(probe)]),
            VendorRegistry::new(),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let context = context.clone();
                std::thread::spawn(move || context.init())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
        assert_eq!(context.scheduler().world_size(), 1);
    }
}
