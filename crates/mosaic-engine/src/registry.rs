//! Device discovery
//!
//! Walks every registered vendor probe, screens devices by health and turns
//! the survivors into immutable [`Device`] records. Query failures never
//! abort discovery: a failing device is skipped, a failing vendor is skipped.

use mosaic_interfaces::DeviceProbe;
use mosaic_types::{Device, DeviceHandle, DeviceProperties, VendorKind};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Registered vendor probes, enumerated in registration order
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    probes: Vec<Arc<dyn DeviceProbe>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probes(probes: Vec<Arc<dyn DeviceProbe>>) -> Self {
        Self { probes }
    }

    pub fn add_probe(&mut self, probe: Arc<dyn DeviceProbe>) {
        self.probes.push(probe);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    /// Enumerate healthy devices of every vendor, in probe then index order
    pub fn discover(&self) -> Vec<Device> {
        info!("Discovering devices across {} vendor probe(s)", self.probes.len());
        let mut devices = Vec::new();

        for probe in &self.probes {
            let vendor = probe.vendor();
            let count = match probe.device_count() {
                Ok(count) => count,
                Err(e) => {
                    error!("Skipping vendor {}: device count failed: {}", vendor.label(), e);
                    continue;
                }
            };
            debug!("{} reports {} device(s)", vendor.label(), count);

            for index in 0..count {
                match Self::screen(probe.as_ref(), index) {
                    Ok(Some(device)) => devices.push(device),
                    Ok(None) => {}
                    Err(e) => error!("Skipping {} device {}: {}", vendor.label(), index, e),
                }
            }
        }

        for device in &devices {
            info!(
                "Found {}: {} | BDF: {} | memory: {:.2} GiB",
                device.handle(),
                device.name(),
                device.pci(),
                device.memory_capacity() as f64 / (1u64 << 30) as f64
            );
        }
        info!("Discovered {} usable device(s)", devices.len());
        devices
    }

    fn screen(probe: &dyn DeviceProbe, index: usize) -> mosaic_types::Result<Option<Device>> {
        let vendor = probe.vendor();
        let properties = probe.properties(index)?;
        let health = probe.health(index)?;

        if !health.is_usable() {
            warn!(
                "Excluding {} device {} ({}): healthy={}, state={:?}",
                vendor.label(),
                index,
                properties.name,
                health.healthy,
                health.state
            );
            return Ok(None);
        }

        Ok(Some(Device::new(
            qualified_name(vendor, &properties),
            properties.pci,
            probe.memory_capacity(&properties),
            DeviceHandle::new(vendor, index),
        )))
    }
}

/// Prefix the vendor label to a product name unless it already carries it
pub fn qualified_name(vendor: VendorKind, properties: &DeviceProperties) -> String {
    let label = vendor.label();
    let name = properties.name.trim();
    if name.to_ascii_lowercase().starts_with(&label.to_ascii_lowercase()) {
        name.to_string()
    } else {
        format!("{} {}", label, name)
    }
}
