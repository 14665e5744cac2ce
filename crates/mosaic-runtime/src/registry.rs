//! Runtime-registered vendor backends

use crate::LoopbackBackend;
use mosaic_interfaces::VendorBackend;
use mosaic_types::VendorKind;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Vendor collective libraries available to this process, keyed by device family
pub struct VendorRegistry {
    backends: RwLock<BTreeMap<VendorKind, Arc<dyn VendorBackend>>>,
}

impl VendorRegistry {
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registry with a loopback backend for each listed vendor
    pub fn with_loopback(vendors: &[VendorKind]) -> Self {
        let registry = Self::new();
        for &vendor in vendors {
            registry.register(Arc::new(LoopbackBackend::new(vendor)));
        }
        registry
    }

    /// Register a backend for its vendor, replacing any previous one
    pub fn register(&self, backend: Arc<dyn VendorBackend>) -> Option<Arc<dyn VendorBackend>> {
        let vendor = backend.vendor();
        debug!("Registering {} for {}", backend.backend_name(), vendor);
        self.backends.write().insert(vendor, backend)
    }

    pub fn get(&self, vendor: VendorKind) -> Option<Arc<dyn VendorBackend>> {
        self.backends.read().get(&vendor).cloned()
    }

    pub fn vendors(&self) -> Vec<VendorKind> {
        self.backends.read().keys().copied().collect()
    }

    pub fn list_backends(&self) -> Vec<String> {
        self.backends
            .read()
            .values()
            .map(|b| b.backend_name().to_string())
            .collect()
    }

    pub fn unregister(&self, vendor: VendorKind) -> Option<Arc<dyn VendorBackend>> {
        self.backends.write().remove(&vendor)
    }
}

impl std::fmt::Debug for VendorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorRegistry")
            .field("vendors", &self.vendors())
            .finish()
    }
}

impl Default for VendorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
