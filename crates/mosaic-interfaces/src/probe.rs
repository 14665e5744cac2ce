//! Read-only view of a vendor's device-management API

use mosaic_types::{DeviceHealth, DeviceProperties, Result, VendorKind};

/// Enumerates and health-checks the devices of one vendor
pub trait DeviceProbe: Send + Sync + std::fmt::Debug {
    /// Vendor this probe reports on
    fn vendor(&self) -> VendorKind;

    /// Number of devices the vendor API reports
    fn device_count(&self) -> Result<usize>;

    /// Static properties of the device at `index`
    fn properties(&self, index: usize) -> Result<DeviceProperties>;

    /// Health flag and state of the device at `index`
    fn health(&self, index: usize) -> Result<DeviceHealth>;

    /// Memory figure recorded as the device's capacity.
    ///
    /// MLU management reports usable memory as available memory, other
    /// vendors report it as total memory.
    fn memory_capacity(&self, properties: &DeviceProperties) -> u64 {
        match self.vendor() {
            VendorKind::Mlu => properties.available_memory,
            _ => properties.total_memory,
        }
    }
}
