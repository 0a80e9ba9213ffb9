pub mod container;
pub mod install;
pub mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use podlock::logging::LogFormat;

#[derive(Parser)]
#[command(name = "podlock")]
#[command(author, version, about = "Per-binary Landlock sandboxing for containers")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "PODLOCK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: json or text
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Prepare a container for sandboxing and print its adjustment as JSON
    CreateContainer(container::ContainerArgs),

    /// Remove the host-side state of a container's pod
    RemoveContainer(container::ContainerArgs),

    /// Install the seal and swap-oci-hook binaries on the host
    Install(install::InstallArgs),

    /// Show Landlock support and configured paths
    Status,
}
