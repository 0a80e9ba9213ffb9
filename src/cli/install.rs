use anyhow::{Result, bail};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

use podlock::config::Config;
use podlock::mutator::filesystem::copy_file_if_different;

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// seal binary to install
    #[arg(long, value_name = "FILE")]
    pub seal: Option<PathBuf>,

    /// swap-oci-hook binary to install
    #[arg(long, value_name = "FILE")]
    pub swap_oci_hook: Option<PathBuf>,
}

/// Copy each given binary to its configured host path, skipping copies whose
/// content is already in place.
pub fn run(args: InstallArgs, config: &Config) -> Result<()> {
    if args.seal.is_none() && args.swap_oci_hook.is_none() {
        bail!("nothing to install: pass --seal and/or --swap-oci-hook");
    }

    let targets = [
        (args.seal, &config.binaries.seal),
        (args.swap_oci_hook, &config.binaries.swap_oci_hook),
    ];
    for (src, dst) in targets {
        let Some(src) = src else { continue };
        if copy_file_if_different(&src, dst)? {
            info!(source = %src.display(), destination = %dst.display(), "installed");
            println!("Installed {}", dst.display());
        } else {
            println!("Up to date {}", dst.display());
        }
    }
    Ok(())
}
