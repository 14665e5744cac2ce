//! Device, vendor and element types

use crate::{MosaicError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Accelerator vendor family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorKind {
    /// NVIDIA CUDA devices
    Cuda,
    /// Cambricon MLU devices
    Mlu,
    /// AMD ROCm devices
    Rocm,
    /// Host memory (reference and staging)
    Host,
}

impl VendorKind {
    /// Human-facing vendor label used to qualify device names
    pub fn label(&self) -> &'static str {
        match self {
            VendorKind::Cuda => "NVIDIA",
            VendorKind::Mlu => "Cambricon",
            VendorKind::Rocm => "AMD",
            VendorKind::Host => "Host",
        }
    }

    /// Short prefix used in device strings (`cuda:0`)
    pub fn prefix(&self) -> &'static str {
        match self {
            VendorKind::Cuda => "cuda",
            VendorKind::Mlu => "mlu",
            VendorKind::Rocm => "rocm",
            VendorKind::Host => "host",
        }
    }
}

impl std::fmt::Display for VendorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for VendorKind {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cuda" | "nvidia" => Ok(VendorKind::Cuda),
            "mlu" | "cambricon" => Ok(VendorKind::Mlu),
            "rocm" | "amd" => Ok(VendorKind::Rocm),
            "host" | "cpu" => Ok(VendorKind::Host),
            other => Err(MosaicError::config(format!("unknown vendor kind '{}'", other))),
        }
    }
}

/// Opaque handle the tensor runtime uses to place buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceHandle {
    pub vendor: VendorKind,
    pub index: usize,
}

impl DeviceHandle {
    pub fn new(vendor: VendorKind, index: usize) -> Self {
        Self { vendor, index }
    }

    pub fn cuda(index: usize) -> Self {
        Self::new(VendorKind::Cuda, index)
    }

    pub fn mlu(index: usize) -> Self {
        Self::new(VendorKind::Mlu, index)
    }

    pub fn host() -> Self {
        Self::new(VendorKind::Host, 0)
    }
}

impl std::fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.vendor, self.index)
    }
}

/// PCI bus location, `domain:bus:device.function`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PciAddress {
    pub domain: u32,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    pub fn new(domain: u32, bus: u8, device: u8, function: u8) -> Self {
        Self {
            domain,
            bus,
            device,
            function,
        }
    }
}

impl std::fmt::Display for PciAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

impl FromStr for PciAddress {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || MosaicError::config(format!("invalid PCI address '{}'", s));

        let (location, function) = match s.rsplit_once('.') {
            Some((location, function)) => (location, function.parse::<u8>().map_err(|_| invalid())?),
            None => (s, 0),
        };
        let parts: Vec<&str> = location.split(':').collect();
        let [domain, bus, device] = parts.as_slice() else {
            return Err(invalid());
        };

        Ok(Self {
            domain: u32::from_str_radix(domain, 16).map_err(|_| invalid())?,
            bus: u8::from_str_radix(bus, 16).map_err(|_| invalid())?,
            device: u8::from_str_radix(device, 16).map_err(|_| invalid())?,
            function,
        })
    }
}

/// A usable accelerator, registered after health screening.
///
/// Immutable once constructed; the scheduler hands out clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    name: String,
    pci: PciAddress,
    vendor: VendorKind,
    memory_capacity: u64,
    handle: DeviceHandle,
}

impl Device {
    pub fn new(
        name: impl Into<String>,
        pci: PciAddress,
        memory_capacity: u64,
        handle: DeviceHandle,
    ) -> Self {
        Self {
            name: name.into(),
            pci,
            vendor: handle.vendor,
            memory_capacity,
            handle,
        }
    }

    /// Vendor-qualified device name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pci(&self) -> PciAddress {
        self.pci
    }

    pub fn vendor(&self) -> VendorKind {
        self.vendor
    }

    /// Memory capacity in bytes
    pub fn memory_capacity(&self) -> u64 {
        self.memory_capacity
    }

    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }
}

/// Health state reported by a vendor management API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    #[default]
    Normal,
    InProblem,
    Unknown,
}

/// Health flag and state of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHealth {
    pub healthy: bool,
    pub state: HealthState,
}

impl DeviceHealth {
    pub fn ok() -> Self {
        Self {
            healthy: true,
            state: HealthState::Normal,
        }
    }

    /// A device is usable only when flagged healthy and not in problem
    pub fn is_usable(&self) -> bool {
        self.healthy && self.state != HealthState::InProblem
    }
}

impl Default for DeviceHealth {
    fn default() -> Self {
        Self::ok()
    }
}

/// Static properties reported by a vendor management API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperties {
    pub name: String,
    pub pci: PciAddress,
    pub total_memory: u64,
    pub available_memory: u64,
}

/// Element type of tensor storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    F64,
    /// 16-bit floating point (IEEE 754)
    F16,
    /// 16-bit brain floating point
    BF16,
    /// 8-bit unsigned integer
    U8,
}

impl DataType {
    /// Get size in bytes for this data type
    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::I64 | DataType::F64 => 8,
            DataType::I32 | DataType::F32 => 4,
            DataType::F16 | DataType::BF16 => 2,
            DataType::U8 => 1,
        }
    }

    /// Check if this is an integer type
    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::I32 | DataType::I64 | DataType::U8)
    }

    /// Check if this is a floating point type
    pub fn is_float(&self) -> bool {
        !self.is_integer()
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::I32 => "int32",
            DataType::I64 => "int64",
            DataType::F32 => "float32",
            DataType::F64 => "float64",
            DataType::F16 => "float16",
            DataType::BF16 => "bfloat16",
            DataType::U8 => "uint8",
        };
        write!(f, "{}", name)
    }
}
