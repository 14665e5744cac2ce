//! Backend initialization command

use crate::output::{to_json, OutputFormat};
use crate::utils::build_context;
use clap::Args;
use colored::*;
use mosaic_types::{BackendConfig, Result};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct InitCommand {
    /// Device inventory file (TOML)
    #[arg(short, long)]
    pub inventory: Option<PathBuf>,

    /// Local rank whose global rank is reported
    #[arg(long, default_value = "0")]
    pub local_rank: usize,
}

#[derive(Debug, Serialize)]
struct InitReport {
    world_size: usize,
    vendors: Vec<String>,
    cross_domain: bool,
    global_rank: usize,
}

/// Discover devices and report the world size; zero devices is an error
pub async fn execute(cmd: InitCommand, config: BackendConfig, format: OutputFormat) -> Result<()> {
    let context = build_context(config, cmd.inventory.as_deref())?;
    let world_size = context.require_devices()?;

    let report = InitReport {
        world_size,
        vendors: context
            .scheduler()
            .vendors()
            .iter()
            .map(|v| v.label().to_string())
            .collect(),
        cross_domain: context.config().is_cross_domain(),
        global_rank: context.global_rank(cmd.local_rank)?,
    };

    match format {
        OutputFormat::Json => println!("{}", to_json(&report)?),
        OutputFormat::Pretty => {
            println!("World size: {}", report.world_size.to_string().green().bold());
            println!("Vendors: {}", report.vendors.join(", ").cyan());
            println!(
                "Cross-domain stage: {}",
                if report.cross_domain { "configured" } else { "off" }
            );
            println!(
                "Local rank {} is global rank {}",
                cmd.local_rank, report.global_rank
            );
        }
    }

    Ok(())
}
