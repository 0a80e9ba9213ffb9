//! Sealing launcher: compile a profile into Landlock rules, restrict the
//! current process, then exec the real binary.
//!
//! The launcher runs in one of two modes, picked from its own invocation name
//! (see [`config::Invocation`]):
//! - native: `seal [flags] -- <binary> [args...]`
//! - wrapper: after the OCI hook swapped it over a container binary, it runs
//!   under that binary's name and execs the relocated original.
//!
//! Enforcement: Landlock LSM only. Every failure is fatal; there is no
//! degraded mode that runs the target unrestricted.

pub mod config;
pub mod elf;
#[cfg(target_os = "linux")]
pub mod enforce;
#[cfg(target_os = "linux")]
pub mod launcher;
pub mod ldd;
#[cfg(target_os = "linux")]
pub mod rules;

use std::path::PathBuf;

pub use config::{Invocation, ProfileSource, SealConfig};
#[cfg(target_os = "linux")]
pub use enforce::{Sealed, detect_landlock_version};
#[cfg(target_os = "linux")]
pub use launcher::{run, sealed_process_env};
pub use ldd::{ResolveError, discover_linked_libraries};
#[cfg(target_os = "linux")]
pub use rules::{AccessLevel, PathKind, Rule, compile_profile, rules_for_binary};

/// Canonical invocation name of the launcher.
pub const SEAL_BINARY_NAME: &str = "seal";

/// Prefix reserved for launcher configuration variables. Variables carrying it
/// are removed before the target binary is exec'd.
pub const SEAL_ENV_PREFIX: &str = "SEAL_";
pub const PROFILE_ENV_VAR: &str = "SEAL_PROFILE_PATH";
pub const LOG_LEVEL_ENV_VAR: &str = "SEAL_LOG_LEVEL";
pub const LOG_FORMAT_ENV_VAR: &str = "SEAL_LOG_FORMAT";
pub const ADD_LINKED_LIBRARIES_ENV_VAR: &str = "SEAL_ADD_LINKED_LIBRARIES";
pub const LDD_TIMEOUT_ENV_VAR: &str = "SEAL_LDD_TIMEOUT_SECS";

#[derive(Debug, thiserror::Error)]
pub enum SealError {
    /// Bad flags or environment, raised before any filesystem or kernel work.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("cannot open profile '{path}': {source}")]
    ProfileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot unmarshal contents of profile file '{path}': {source}")]
    ProfileParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot find profile for '{binary}' in '{path}'")]
    ProfileNotFound { path: PathBuf, binary: PathBuf },

    #[error("could not discover linked libraries: {0}")]
    Resolve(#[from] ResolveError),

    #[error("could not start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("could not enable Landlock: {0}")]
    Enforcement(String),

    #[error("could not execve '{binary}': {source}")]
    Exec {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<crate::logging::LogConfigError> for SealError {
    fn from(e: crate::logging::LogConfigError) -> Self {
        SealError::Config(e.to_string())
    }
}
