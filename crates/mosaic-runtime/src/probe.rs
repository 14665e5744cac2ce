//! Device probes that stand in for vendor management APIs
//!
//! [`StaticProbe`] is built in code, [`InventoryProbe`] is loaded from a TOML
//! inventory file. Either can report per-device query failures, which lets
//! discovery's skip-and-continue path be exercised without hardware.

use mosaic_interfaces::DeviceProbe;
use mosaic_types::{
    DeviceHealth, DeviceProperties, HealthState, MosaicError, PciAddress, Result, VendorKind,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
struct ProbeEntry {
    properties: DeviceProperties,
    health: DeviceHealth,
    query_error: Option<String>,
}

/// Probe with a fixed device list
#[derive(Debug, Clone)]
pub struct StaticProbe {
    vendor: VendorKind,
    devices: Vec<ProbeEntry>,
    count_error: Option<String>,
}

impl StaticProbe {
    pub fn new(vendor: VendorKind) -> Self {
        Self {
            vendor,
            devices: Vec::new(),
            count_error: None,
        }
    }

    pub fn with_device(mut self, properties: DeviceProperties, health: DeviceHealth) -> Self {
        self.devices.push(ProbeEntry {
            properties,
            health,
            query_error: None,
        });
        self
    }

    /// Healthy device with the given name and memory, at bus `0x3b + index`
    pub fn with_healthy(self, name: &str, memory: u64) -> Self {
        let bus = 0x3b_u8.wrapping_add(self.devices.len() as u8);
        let properties = DeviceProperties {
            name: name.to_string(),
            pci: PciAddress::new(0, bus, 0, 0),
            total_memory: memory,
            available_memory: memory,
        };
        self.with_device(properties, DeviceHealth::ok())
    }

    /// Device whose property and health queries fail with `message`
    pub fn with_faulty_device(mut self, properties: DeviceProperties, message: &str) -> Self {
        self.devices.push(ProbeEntry {
            properties,
            health: DeviceHealth::ok(),
            query_error: Some(message.to_string()),
        });
        self
    }

    /// Make the device-count query fail with `message`
    pub fn with_count_error(mut self, message: &str) -> Self {
        self.count_error = Some(message.to_string());
        self
    }

    fn entry(&self, index: usize) -> Result<&ProbeEntry> {
        let entry = self.devices.get(index).ok_or_else(|| {
            MosaicError::device(format!("{} device {} does not exist", self.vendor, index))
        })?;
        match &entry.query_error {
            Some(message) => Err(MosaicError::device(format!(
                "{} device {}: {}",
                self.vendor, index, message
            ))),
            None => Ok(entry),
        }
    }
}

impl DeviceProbe for StaticProbe {
    fn vendor(&self) -> VendorKind {
        self.vendor
    }

    fn device_count(&self) -> Result<usize> {
        match &self.count_error {
            Some(message) => Err(MosaicError::device(format!(
                "{} device count: {}",
                self.vendor, message
            ))),
            None => Ok(self.devices.len()),
        }
    }

    fn properties(&self, index: usize) -> Result<DeviceProperties> {
        self.entry(index).map(|e| e.properties.clone())
    }

    fn health(&self, index: usize) -> Result<DeviceHealth> {
        self.entry(index).map(|e| e.health)
    }
}

/// One `[[device]]` table of an inventory file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryDevice {
    pub vendor: VendorKind,
    pub name: String,
    pub pci: String,
    pub total_memory: u64,
    #[serde(default)]
    pub available_memory: Option<u64>,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
    #[serde(default)]
    pub state: HealthState,
    /// Simulated query failure for this device
    #[serde(default)]
    pub error: Option<String>,
}

fn default_healthy() -> bool {
    true
}

/// Inventory file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default, rename = "device")]
    pub devices: Vec<InventoryDevice>,
}

impl Inventory {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MosaicError::config(format!(
                "Failed to read inventory {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| MosaicError::config(format!("Failed to parse inventory: {}", e)))
    }
}

/// Probe for one vendor's devices from an inventory file
#[derive(Debug, Clone)]
pub struct InventoryProbe {
    source: PathBuf,
    inner: StaticProbe,
}

impl InventoryProbe {
    /// Load an inventory and split it into one probe per vendor, in order of
    /// first appearance.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<Self>> {
        let inventory = Inventory::from_file(path.as_ref())?;
        Self::from_inventory(path.as_ref(), &inventory)
    }

    pub fn from_inventory(source: &Path, inventory: &Inventory) -> Result<Vec<Self>> {
        let mut probes: Vec<Self> = Vec::new();
        for device in &inventory.devices {
            let properties = DeviceProperties {
                name: device.name.clone(),
                pci: device.pci.parse()?,
                total_memory: device.total_memory,
                available_memory: device.available_memory.unwrap_or(device.total_memory),
            };
            let health = DeviceHealth {
                healthy: device.healthy,
                state: device.state,
            };

            let position = match probes.iter().position(|p| p.inner.vendor == device.vendor) {
                Some(position) => position,
                None => {
                    probes.push(Self {
                        source: source.to_path_buf(),
                        inner: StaticProbe::new(device.vendor),
                    });
                    probes.len() - 1
                }
            };
            let probe = &mut probes[position];
            probe.inner = match &device.error {
                Some(message) => probe.inner.clone().with_faulty_device(properties, message),
                None => probe.inner.clone().with_device(properties, health),
            };
        }
        Ok(probes)
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

impl DeviceProbe for InventoryProbe {
    fn vendor(&self) -> VendorKind {
        self.inner.vendor()
    }

    fn device_count(&self) -> Result<usize> {
        self.inner.device_count()
    }

    fn properties(&self, index: usize) -> Result<DeviceProperties> {
        self.inner.properties(index)
    }

    fn health(&self, index: usize) -> Result<DeviceHealth> {
        self.inner.health(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_probe_errors() {
        let probe = StaticProbe::new(VendorKind::Cuda)
            .with_healthy("GeForce RTX 3090", 24 << 30)
            .with_faulty_device(
                DeviceProperties {
                    name: "A100".to_string(),
                    pci: PciAddress::default(),
                    total_memory: 40 << 30,
                    available_memory: 40 << 30,
                },
                "NVML_ERROR_GPU_IS_LOST",
            );

        assert_eq!(probe.device_count().unwrap(), 2);
        assert_eq!(probe.properties(0).unwrap().pci.to_string(), "0000:3b:00.0");
        assert!(probe.health(1).is_err());
        assert!(probe.properties(5).is_err());

        let broken = StaticProbe::new(VendorKind::Mlu).with_count_error("driver not loaded");
        assert!(broken.device_count().is_err());
    }

    #[test]
    fn test_inventory_groups_by_vendor() {
        let inventory = Inventory::from_toml(
            r#"
[[device]]
vendor = "mlu"
name = "MLU370-X8"
pci = "0000:3b:00.0"
total_memory = 25769803776
available_memory = 24000000000

[[device]]
vendor = "cuda"
name = "GeForce RTX 3090"
pci = "0000:af:00.0"
total_memory = 25769803776

[[device]]
vendor = "mlu"
name = "MLU370-X8"
pci = "0000:3c:00.0"
total_memory = 25769803776
healthy = false
"#,
        )
        .unwrap();

        let probes = InventoryProbe::from_inventory(Path::new("inventory.toml"), &inventory).unwrap();
        assert_eq!(probes.len(), 2);
        assert_eq!(probes[0].vendor(), VendorKind::Mlu);
        assert_eq!(probes[0].device_count().unwrap(), 2);
        assert!(!probes[0].health(1).unwrap().healthy);
        assert_eq!(probes[0].properties(0).unwrap().available_memory, 24000000000);
        assert_eq!(probes[1].vendor(), VendorKind::Cuda);
    }

    #[test]
    fn test_inventory_rejects_bad_pci() {
        let inventory = Inventory::from_toml(
            r#"
[[device]]
vendor = "cuda"
name = "X"
pci = "not-a-bus"
total_memory = 1
"#,
        )
        .unwrap();
        assert!(InventoryProbe::from_inventory(Path::new("x.toml"), &inventory).is_err());
    }

    #[test]
    fn test_load_inventory_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.toml");
        std::fs::write(
            &path,
            r#"
[[device]]
vendor = "cuda"
name = "GeForce RTX 3090"
pci = "0000:af:00.0"
total_memory = 25769803776

[[device]]
vendor = "cuda"
name = "GeForce RTX 3090"
pci = "0000:b0:00.0"
total_memory = 25769803776
error = "NVML_ERROR_GPU_IS_LOST"
"#,
        )
        .unwrap();

        let probes = InventoryProbe::load(&path).unwrap();
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].source(), path.as_path());
        assert_eq!(probes[0].vendor(), VendorKind::Cuda);
        assert_eq!(probes[0].device_count().unwrap(), 2);
        assert_eq!(probes[0].properties(0).unwrap().pci.to_string(), "0000:af:00.0");
        assert!(probes[0].health(1).is_err());
    }

    #[test]
    fn test_missing_inventory_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let err = InventoryProbe::load(&missing).unwrap_err();
        assert!(matches!(err, MosaicError::Config { .. }));
        assert!(err.to_string().contains("absent.toml"));

        let garbled = dir.path().join("garbled.toml");
        std::fs::write(&garbled, "[[device]\nvendor = ").unwrap();
        assert!(Inventory::from_file(&garbled).is_err());
    }
}
