//! CLI command implementations

pub mod config_cmd;
pub mod devices;
pub mod init;
pub mod selftest;

pub use config_cmd::ConfigCommand;
pub use devices::DevicesCommand;
pub use init::InitCommand;
pub use selftest::SelftestCommand;
