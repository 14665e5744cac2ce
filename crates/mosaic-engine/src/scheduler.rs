//! Registry of discovered devices

use mosaic_types::{Device, DeviceHandle, VendorKind};
use parking_lot::RwLock;

/// Ordered list of usable devices; insertion order is discovery order.
///
/// Populated once during bootstrap and read-only afterwards.
#[derive(Debug, Default)]
pub struct Scheduler {
    devices: RwLock<Vec<Device>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a device; duplicates are not filtered
    pub fn add_device(&self, device: Device) {
        self.devices.write().push(device);
    }

    pub fn world_size(&self) -> usize {
        self.devices.read().len()
    }

    /// Copy of the ordered device list
    pub fn available_devices(&self) -> Vec<Device> {
        self.devices.read().clone()
    }

    pub fn device_available(&self) -> bool {
        !self.devices.read().is_empty()
    }

    pub fn device(&self, handle: DeviceHandle) -> Option<Device> {
        self.devices
            .read()
            .iter()
            .find(|d| d.handle() == handle)
            .cloned()
    }

    /// Distinct vendors in order of first appearance
    pub fn vendors(&self) -> Vec<VendorKind> {
        let mut vendors = Vec::new();
        for device in self.devices.read().iter() {
            if !vendors.contains(&device.vendor()) {
                vendors.push(device.vendor());
            }
        }
        vendors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_types::PciAddress;

    fn device(handle: DeviceHandle) -> Device {
        Device::new("test", PciAddress::default(), 1 << 30, handle)
    }

    #[test]
    fn test_add_keeps_order_and_duplicates() {
        let scheduler = Scheduler::new();
        assert!(!scheduler.device_available());

        scheduler.add_device(device(DeviceHandle::mlu(0)));
        scheduler.add_device(device(DeviceHandle::cuda(0)));
        scheduler.add_device(device(DeviceHandle::mlu(0)));

        assert_eq!(scheduler.world_size(), 3);
        let handles: Vec<_> = scheduler
            .available_devices()
            .iter()
            .map(|d| d.handle())
            .collect();
        assert_eq!(
            handles,
            vec![DeviceHandle::mlu(0), DeviceHandle::cuda(0), DeviceHandle::mlu(0)]
        );
        assert_eq!(scheduler.vendors(), vec![VendorKind::Mlu, VendorKind::Cuda]);
        assert!(scheduler.device(DeviceHandle::cuda(0)).is_some());
        assert!(scheduler.device(DeviceHandle::cuda(1)).is_none());
    }
}
