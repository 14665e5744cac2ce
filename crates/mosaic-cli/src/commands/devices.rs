//! Device listing command

use crate::output::{to_json, OutputFormat};
use crate::utils::{build_context, format_bytes};
use clap::Args;
use colored::*;
use mosaic_types::{BackendConfig, Result};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct DevicesCommand {
    /// Device inventory file (TOML)
    #[arg(short, long)]
    pub inventory: Option<PathBuf>,
}

pub async fn execute(cmd: DevicesCommand, config: BackendConfig, format: OutputFormat) -> Result<()> {
    let context = build_context(config, cmd.inventory.as_deref())?;
    context.init();
    let devices = context.scheduler().available_devices();

    match format {
        OutputFormat::Json => println!("{}", to_json(&devices)?),
        OutputFormat::Pretty => {
            println!("{}", "Usable devices".bright_blue().bold());
            if devices.is_empty() {
                println!("  {}", "none".yellow());
            }
            for (rank, device) in devices.iter().enumerate() {
                println!(
                    "  [{}] {:<8} {:<28} BDF {}  {}",
                    rank,
                    device.handle().to_string().cyan(),
                    device.name(),
                    device.pci(),
                    format_bytes(device.memory_capacity())
                );
            }
        }
    }

    Ok(())
}
