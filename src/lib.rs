//! podlock - per-binary Landlock sandboxing for containers
//!
//! - `seal`: the launcher that restricts itself with Landlock, then execs the
//!   protected binary
//! - `swap`: the OCI hook putting the launcher in place of a container binary
//! - `mutator`: container-creation handling, host state and adjustments
//! - `profile`: the policy types shared by all of them

pub mod config;
pub mod logging;
pub mod mutator;
pub mod paths;
pub mod profile;
pub mod seal;
#[cfg(target_os = "linux")]
pub mod swap;

pub use config::Config;
pub use profile::{Profile, ProfileByBinary};
