//! Mosaic CLI - operator tooling for the heterogeneous collective backend

use clap::{Parser, Subcommand};
use colored::*;
use mosaic_cli::{
    commands::*,
    utils::{load_config, setup_logging},
    OutputFormat,
};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "mosaic")]
#[command(about = "Mosaic heterogeneous collective backend CLI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path; `MOSAIC_*` variables are used without one
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover and list usable devices
    Devices(DevicesCommand),

    /// Initialize the backend and report the world size
    Init(InitCommand),

    /// Show, validate or generate configuration
    Config(ConfigCommand),

    /// Run collectives across in-process ranks
    Selftest(SelftestCommand),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet).unwrap_or_else(|e| {
        eprintln!("{} Failed to setup logging: {}", "Error:".red().bold(), e);
        process::exit(1);
    });

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} Failed to load config: {}", "Error:".red().bold(), e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Devices(cmd) => devices::execute(cmd, config, cli.format).await,
        Commands::Init(cmd) => init::execute(cmd, config, cli.format).await,
        Commands::Config(cmd) => config_cmd::execute(cmd, config, cli.format).await,
        Commands::Selftest(cmd) => selftest::execute(cmd, config, cli.format).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        process::exit(1);
    }
}
