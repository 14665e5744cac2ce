//! # Mosaic CLI Library
//!
//! Operator tooling for the heterogeneous collective backend.
//!
//! ## Commands
//!
//! - `devices`: Discover and list usable accelerators
//! - `init`: Report the world size this node contributes
//! - `config`: Show, validate or generate backend configuration
//! - `selftest`: Run collectives across in-process ranks and print timings

pub mod commands;
pub mod output;
pub mod utils;

pub use output::OutputFormat;
