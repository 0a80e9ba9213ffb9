//! Sealed launcher.
//!
//! `seal [--ro PATH]... [--rx PATH]... [--rw PATH]... [--rwx PATH]... -- <binary> [args...]`
//!
//! Under any other name it acts as the wrapper of the binary it replaced.

#[cfg(target_os = "linux")]
fn main() {
    use podlock::seal::{self, SealConfig, SealError};

    // Configuration is settled before any filesystem or kernel work
    let config = match SealConfig::from_process() {
        Ok(config) => config,
        Err(SealError::Cli(e)) => e.exit(),
        Err(e) => {
            eprintln!("seal: error parsing flags: {e}");
            std::process::exit(1);
        }
    };

    podlock::logging::init(config.log_level, config.log_format);

    // Only returns on failure
    let Err(e) = seal::run(&config);
    tracing::error!(error = %e, binary = %config.binary.display(), "seal failed");
    std::process::exit(1);
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("seal: Landlock is only available on Linux");
    std::process::exit(1);
}
