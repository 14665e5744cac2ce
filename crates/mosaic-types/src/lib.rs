//! Core type definitions for the Mosaic collective backend
//!
//! This crate contains the fundamental types shared by every other Mosaic
//! crate: device and vendor descriptions, collective operation kinds and
//! options, configuration, and the error taxonomy. It is kept free of
//! transport and runtime dependencies so it can sit at the bottom of the
//! workspace.

pub mod config;
pub mod devices;
pub mod errors;
pub mod ops;

// Re-export commonly used types
pub use config::*;
pub use devices::*;
pub use errors::*;
pub use ops::*;

/// Result type used throughout Mosaic
pub type Result<T> = std::result::Result<T, MosaicError>;
