//! CLI utility functions

use mosaic_engine::{BackendContext, DeviceRegistry};
use mosaic_interfaces::DeviceProbe;
use mosaic_runtime::{InventoryProbe, VendorRegistry};
use mosaic_types::{BackendConfig, Result};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Setup logging based on verbosity level
pub fn setup_logging(verbose: bool, quiet: bool) -> Result<()> {
    let log_level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    let filter = if verbose || quiet {
        EnvFilter::new(log_level.to_string())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    Ok(())
}

/// Configuration from a TOML file when given, otherwise from `MOSAIC_*` variables
pub fn load_config(path: Option<&Path>) -> Result<BackendConfig> {
    match path {
        Some(path) => BackendConfig::from_file(path),
        None => BackendConfig::from_env(),
    }
}

/// Probes described by an inventory file; none without one
pub fn load_probes(inventory: Option<&Path>) -> Result<Vec<Arc<dyn DeviceProbe>>> {
    let Some(path) = inventory else {
        return Ok(Vec::new());
    };
    Ok(InventoryProbe::load(path)?
        .into_iter()
        .map(|probe| Arc::new(probe) as Arc<dyn DeviceProbe>)
        .collect())
}

/// Backend context over the inventory, with loopback libraries for every vendor it lists
pub fn build_context(config: BackendConfig, inventory: Option<&Path>) -> Result<Arc<BackendContext>> {
    let probes = load_probes(inventory)?;
    let vendors: Vec<_> = probes.iter().map(|p| p.vendor()).collect();
    Ok(Arc::new(BackendContext::new(
        config,
        DeviceRegistry::with_probes(probes),
        VendorRegistry::with_loopback(&vendors),
    )))
}

/// Format bytes in human readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
