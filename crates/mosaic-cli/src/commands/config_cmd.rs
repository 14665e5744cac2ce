//! Configuration command implementation

use crate::output::{to_json, OutputFormat};
use clap::Args;
use colored::*;
use mosaic_types::{BackendConfig, MosaicError, Result};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ConfigCommand {
    /// Validate configuration
    #[arg(long)]
    pub validate: bool,

    /// Generate default configuration
    #[arg(long)]
    pub generate: bool,

    /// Output file for generated config
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub async fn execute(cmd: ConfigCommand, config: BackendConfig, format: OutputFormat) -> Result<()> {
    if cmd.validate {
        return validate_config(&config);
    }

    if cmd.generate {
        return generate_config(cmd.output);
    }

    show_config(&config, format)
}

fn show_config(config: &BackendConfig, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", to_json(config)?),
        OutputFormat::Pretty => {
            println!("Timeout: {}s", config.timeout_secs.to_string().cyan());
            println!("Mean correction: {:?}", config.mean_correction);
            println!(
                "Re-broadcast after cross-domain stage: {}",
                config.rebroadcast_after_cross_domain
            );
            match &config.rendezvous {
                Some(rz) => {
                    println!("Cross-domain:");
                    println!("  Rank: {} of {}", rz.rank, rz.world_size);
                    println!("  Transport: {}", rz.transport_addr.cyan());
                    println!("  Store: {}", rz.store_path.display());
                }
                None => println!("Cross-domain: {}", "off".yellow()),
            }
            if let Some(start) = config.global_rank_start {
                println!("Global rank start: {}", start);
            }
            if let Some(size) = config.global_world_size {
                println!("Global world size: {}", size);
            }
            println!("Log level: {}", config.logging.level.cyan());
        }
    }
    Ok(())
}

fn validate_config(config: &BackendConfig) -> Result<()> {
    match config.validate() {
        Ok(()) => {
            println!("{} Configuration is valid", "✓".green());
            Ok(())
        }
        Err(e) => {
            println!("{} Configuration validation failed: {}", "✗".red(), e);
            Err(e)
        }
    }
}

fn generate_config(output: Option<PathBuf>) -> Result<()> {
    let output = output.unwrap_or_else(|| PathBuf::from("mosaic.toml"));
    if output.exists() {
        return Err(MosaicError::config(format!(
            "Refusing to overwrite {}",
            output.display()
        )));
    }
    std::fs::write(&output, BackendConfig::default().to_toml()?)?;
    println!("{} Wrote default configuration to {}", "✓".green(), output.display());
    Ok(())
}
