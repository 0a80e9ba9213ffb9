//! OCI hook swapping a container binary with the sealed launcher.
//!
//! The runtime invokes it as `swap-oci-hook -target <path> -backup <path>`
//! with the container root as working directory. A non-zero exit fails the
//! container creation.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "swap-oci-hook")]
#[command(about = "Swap a container binary with the seal launcher")]
struct HookArgs {
    /// Absolute path of the binary to protect, inside the container
    #[arg(long)]
    target: PathBuf,

    /// Placeholder receiving the original binary, inside the container
    #[arg(long)]
    backup: PathBuf,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Hooks are registered with single-dash long flags; accept both forms.
fn normalize_args<I: IntoIterator<Item = OsString>>(args: I) -> Vec<OsString> {
    args.into_iter()
        .enumerate()
        .map(|(i, arg)| {
            let bytes = arg.as_encoded_bytes();
            let single_dash_long = i > 0
                && bytes.len() > 2
                && bytes[0] == b'-'
                && bytes[1] != b'-'
                && ["-target", "-backup", "-log-level"]
                    .iter()
                    .any(|flag| bytes == flag.as_bytes() || bytes.starts_with(format!("{flag}=").as_bytes()));
            if single_dash_long {
                let mut fixed = OsString::from("-");
                fixed.push(&arg);
                fixed
            } else {
                arg
            }
        })
        .collect()
}

#[cfg(target_os = "linux")]
fn main() {
    use podlock::logging::{self, LogFormat};
    use podlock::swap;

    let args = match HookArgs::try_parse_from(normalize_args(std::env::args_os())) {
        Ok(args) => args,
        Err(e) => e.exit(),
    };
    let level = match logging::parse_level(&args.log_level) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("swap-oci-hook: {e}");
            std::process::exit(1);
        }
    };
    logging::init(level, LogFormat::Text);

    if let Err(e) = swap::chroot_to_container_root()
        .and_then(|()| swap::swap_binary(&args.target, &args.backup))
    {
        tracing::error!(
            error = %e,
            target = %args.target.display(),
            backup = %args.backup.display(),
            "failed to perform swap"
        );
        std::process::exit(1);
    }
}

#[cfg(not(target_os = "linux"))]
fn main() {
    let _ = normalize_args(std::env::args_os());
    eprintln!("swap-oci-hook: mount swapping is only available on Linux");
    std::process::exit(1);
}
