//! Output formatting

use clap::ValueEnum;
use mosaic_types::{MosaicError, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human readable text
    #[default]
    Pretty,
    /// Machine readable JSON
    Json,
}

/// Render a value as pretty JSON
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| MosaicError::serialization(format!("Failed to serialize output: {}", e)))
}
