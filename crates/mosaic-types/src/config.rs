//! Configuration for the collective backend
//!
//! Settings come from defaults, a TOML file, or `MOSAIC_*` environment
//! variables. The cross-domain rendezvous section is optional: without it the
//! backend runs vendor sub-groups only.

use crate::{MosaicError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const ENV_XDOMAIN_RANK: &str = "MOSAIC_XDOMAIN_RANK";
pub const ENV_XDOMAIN_WORLD_SIZE: &str = "MOSAIC_XDOMAIN_WORLD_SIZE";
pub const ENV_XDOMAIN_ADDR: &str = "MOSAIC_XDOMAIN_ADDR";
pub const ENV_XDOMAIN_STORE: &str = "MOSAIC_XDOMAIN_STORE";
pub const ENV_GLOBAL_RANK_START: &str = "MOSAIC_GLOBAL_RANK_START";
pub const ENV_GLOBAL_WORLD_SIZE: &str = "MOSAIC_GLOBAL_WORLD_SIZE";
pub const ENV_TIMEOUT_SECS: &str = "MOSAIC_TIMEOUT_SECS";
pub const ENV_LOG_LEVEL: &str = "MOSAIC_LOG_LEVEL";

/// Where the mean correction is applied relative to the cross-domain ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeanCorrection {
    /// Leave the ring output untouched
    Disabled,
    /// Divide the ring output by the cross-domain world size
    #[default]
    AfterRing,
    /// Divide the staged input before it enters the ring
    BeforeRing,
}

/// Main backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Default timeout for collective calls and group creation, in seconds
    pub timeout_secs: u64,
    /// Cross-domain rendezvous; `None` means vendor sub-groups only
    pub rendezvous: Option<RendezvousConfig>,
    /// Mean correction policy for the cross-domain all-reduce
    pub mean_correction: MeanCorrection,
    /// Re-broadcast cross-domain results from local rank 0 to the vendor sub-group
    pub rebroadcast_after_cross_domain: bool,
    /// Offset added to local ranks to obtain global ranks
    pub global_rank_start: Option<usize>,
    /// Size of the global job, when known
    pub global_world_size: Option<usize>,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Cross-domain full-mesh settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendezvousConfig {
    /// Rank of this process among cross-domain participants
    pub rank: usize,
    /// Number of cross-domain participants
    pub world_size: usize,
    /// Local address the transport listener binds to
    pub transport_addr: String,
    /// Shared directory backing the file store
    pub store_path: PathBuf,
    /// Mesh formation timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, compact)
    pub format: String,
}

fn default_connect_timeout_secs() -> u64 {
    60
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            rendezvous: None,
            mean_correction: MeanCorrection::AfterRing,
            rebroadcast_after_cross_domain: true,
            global_rank_start: None,
            global_world_size: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MosaicError::config(format!("Invalid value for {}: '{}'", name, value)))
}

impl RendezvousConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read the cross-domain section from the process environment
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the cross-domain section through an arbitrary variable lookup.
    ///
    /// All four variables present yields a configuration, none yields `None`,
    /// and a partial set logs a warning and also yields `None`.
    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rank = lookup(ENV_XDOMAIN_RANK);
        let world_size = lookup(ENV_XDOMAIN_WORLD_SIZE);
        let addr = lookup(ENV_XDOMAIN_ADDR);
        let store = lookup(ENV_XDOMAIN_STORE);

        let rank = rank
            .map(|v| parse_var::<usize>(ENV_XDOMAIN_RANK, &v))
            .transpose()?;
        let world_size = world_size
            .map(|v| parse_var::<usize>(ENV_XDOMAIN_WORLD_SIZE, &v))
            .transpose()?;

        match (rank, world_size, addr, store) {
            (Some(rank), Some(world_size), Some(transport_addr), Some(store)) => {
                let config = Self {
                    rank,
                    world_size,
                    transport_addr,
                    store_path: PathBuf::from(store),
                    connect_timeout_secs: default_connect_timeout_secs(),
                };
                config.validate()?;
                Ok(Some(config))
            }
            (None, None, None, None) => Ok(None),
            (rank, world_size, addr, store) => {
                let missing: Vec<&str> = [
                    (rank.is_none(), ENV_XDOMAIN_RANK),
                    (world_size.is_none(), ENV_XDOMAIN_WORLD_SIZE),
                    (addr.is_none(), ENV_XDOMAIN_ADDR),
                    (store.is_none(), ENV_XDOMAIN_STORE),
                ]
                .into_iter()
                .filter_map(|(absent, name)| absent.then_some(name))
                .collect();
                warn!(
                    "Cross-domain rendezvous partially configured, missing {}; running vendor-only",
                    missing.join(", ")
                );
                Ok(None)
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.world_size == 0 {
            return Err(MosaicError::config(
                "Cross-domain world size must be greater than 0",
            ));
        }
        if self.rank >= self.world_size {
            return Err(MosaicError::config(format!(
                "Cross-domain rank {} out of range for world size {}",
                self.rank, self.world_size
            )));
        }
        if self.transport_addr.is_empty() {
            return Err(MosaicError::config("Transport address cannot be empty"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(MosaicError::config(
                "Connect timeout must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.rendezvous = RendezvousConfig::from_lookup(&lookup)?;

        if let Some(start) = lookup(ENV_GLOBAL_RANK_START) {
            config.global_rank_start = Some(parse_var(ENV_GLOBAL_RANK_START, &start)?);
        }
        if let Some(size) = lookup(ENV_GLOBAL_WORLD_SIZE) {
            config.global_world_size = Some(parse_var(ENV_GLOBAL_WORLD_SIZE, &size)?);
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT_SECS) {
            config.timeout_secs = parse_var(ENV_TIMEOUT_SECS, &timeout)?;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            config.logging.level = level.trim().to_ascii_lowercase();
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MosaicError::config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| MosaicError::config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| MosaicError::serialization(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(MosaicError::config("Timeout must be greater than 0"));
        }

        if let Some(rendezvous) = &self.rendezvous {
            rendezvous.validate()?;
        }

        if let (Some(start), Some(size)) = (self.global_rank_start, self.global_world_size) {
            if start >= size {
                return Err(MosaicError::config(format!(
                    "Global rank start {} out of range for global world size {}",
                    start, size
                )));
            }
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(MosaicError::config(
                "Log level must be one of: trace, debug, info, warn, error",
            ));
        }
        if !["pretty", "compact"].contains(&self.logging.format.as_str()) {
            return Err(MosaicError::config(
                "Log format must be one of: pretty, compact",
            ));
        }

        Ok(())
    }

    /// Whether the cross-domain stage is configured
    pub fn is_cross_domain(&self) -> bool {
        self.rendezvous.is_some()
    }

    /// Map a local rank to its global rank
    pub fn global_rank(&self, local_rank: usize) -> Result<usize> {
        let global = self.global_rank_start.unwrap_or(0) + local_rank;
        match self.global_world_size {
            Some(size) if global >= size => Err(MosaicError::config(format!(
                "Global rank {} (local {}) exceeds global world size {}",
                global, local_rank, size
            ))),
            _ => Ok(global),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = BackendConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.is_cross_domain());
        assert_eq!(config.mean_correction, MeanCorrection::AfterRing);
        assert!(config.rebroadcast_after_cross_domain);
    }

    #[test]
    fn test_rendezvous_all_present() {
        let lookup = lookup_from(&[
            (ENV_XDOMAIN_RANK, "1"),
            (ENV_XDOMAIN_WORLD_SIZE, "2"),
            (ENV_XDOMAIN_ADDR, "127.0.0.1:0"),
            (ENV_XDOMAIN_STORE, "/tmp/mosaic-store"),
        ]);
        let rendezvous = RendezvousConfig::from_lookup(lookup).unwrap().unwrap();
        assert_eq!(rendezvous.rank, 1);
        assert_eq!(rendezvous.world_size, 2);
        assert_eq!(rendezvous.store_path, PathBuf::from("/tmp/mosaic-store"));
    }

    #[test]
    fn test_rendezvous_absent_or_partial() {
        assert!(RendezvousConfig::from_lookup(lookup_from(&[]))
            .unwrap()
            .is_none());

        let partial = lookup_from(&[(ENV_XDOMAIN_RANK, "0"), (ENV_XDOMAIN_ADDR, "127.0.0.1:0")]);
        assert!(RendezvousConfig::from_lookup(partial).unwrap().is_none());
    }

    #[test]
    fn test_rendezvous_malformed_number() {
        let lookup = lookup_from(&[
            (ENV_XDOMAIN_RANK, "zero"),
            (ENV_XDOMAIN_WORLD_SIZE, "2"),
            (ENV_XDOMAIN_ADDR, "127.0.0.1:0"),
            (ENV_XDOMAIN_STORE, "/tmp/mosaic-store"),
        ]);
        let err = RendezvousConfig::from_lookup(lookup).unwrap_err();
        assert!(matches!(err, MosaicError::Config { .. }));

        let out_of_range = lookup_from(&[
            (ENV_XDOMAIN_RANK, "2"),
            (ENV_XDOMAIN_WORLD_SIZE, "2"),
            (ENV_XDOMAIN_ADDR, "127.0.0.1:0"),
            (ENV_XDOMAIN_STORE, "/tmp/mosaic-store"),
        ]);
        assert!(RendezvousConfig::from_lookup(out_of_range).is_err());
    }

    #[test]
    fn test_global_rank_mapping() {
        let config = BackendConfig::from_lookup(lookup_from(&[
            (ENV_GLOBAL_RANK_START, "4"),
            (ENV_GLOBAL_WORLD_SIZE, "8"),
        ]))
        .unwrap();
        assert_eq!(config.global_rank(0).unwrap(), 4);
        assert_eq!(config.global_rank(3).unwrap(), 7);
        assert!(config.global_rank(4).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = BackendConfig::default();
        config.timeout_secs = 0;
        assert!(config.validate().is_err());

        config.timeout_secs = 30;
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mosaic.toml");
        std::fs::write(
            &path,
            r#"
timeout_secs = 45
mean_correction = "before_ring"

[rendezvous]
rank = 0
world_size = 2
transport_addr = "127.0.0.1:29500"
store_path = "/tmp/mosaic"

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = BackendConfig::from_file(&path).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(45));
        assert_eq!(config.mean_correction, MeanCorrection::BeforeRing);
        assert_eq!(config.logging.format, "pretty");
        let rendezvous = config.rendezvous.unwrap();
        assert_eq!(rendezvous.connect_timeout_secs, 60);
        assert_eq!(rendezvous.transport_addr, "127.0.0.1:29500");
    }

    #[test]
    fn test_toml_roundtrip_default() {
        let text = BackendConfig::default().to_toml().unwrap();
        let back: BackendConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, BackendConfig::default());
    }
}
