//! Host-side configuration for the `podlock` binary.
//!
//! Read from TOML; every field has a default, so a missing file or a partial
//! one is fine.
//!
//! ```toml
//! [runtime]
//! dir = "/var/run/podlock"
//!
//! [binaries]
//! seal = "/opt/podlock/bin/seal"
//! swap_oci_hook = "/opt/podlock/bin/swap-oci-hook"
//!
//! [policy]
//! dir = "/etc/podlock/profiles"
//! timeout_secs = 10
//!
//! [seal]
//! log_level = "info"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging;
use crate::paths::HostLayout;

/// Used when neither `--config` nor `PODLOCK_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/podlock/config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub binaries: BinariesConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub seal: SealSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Per-pod state: policy files and placeholders
    #[serde(default = "default_runtime_dir")]
    pub dir: PathBuf,
}

/// Where the launcher and hook binaries are installed on the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinariesConfig {
    #[serde(default = "default_seal_binary")]
    pub seal: PathBuf,

    #[serde(default = "default_swap_oci_hook_binary")]
    pub swap_oci_hook: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Root of the file-backed policy store
    #[serde(default = "default_policy_dir")]
    pub dir: PathBuf,

    /// Deadline for one policy lookup
    #[serde(default = "default_policy_timeout")]
    pub timeout_secs: u64,
}

/// Settings injected into sandboxed containers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealSettings {
    #[serde(default = "default_seal_log_level")]
    pub log_level: String,
}

fn default_runtime_dir() -> PathBuf {
    HostLayout::default().runtime_dir
}
fn default_seal_binary() -> PathBuf {
    HostLayout::default().seal_binary
}
fn default_swap_oci_hook_binary() -> PathBuf {
    HostLayout::default().swap_oci_hook_binary
}
fn default_policy_dir() -> PathBuf {
    PathBuf::from("/etc/podlock/profiles")
}
fn default_policy_timeout() -> u64 {
    10
}
fn default_seal_log_level() -> String {
    "info".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dir: default_runtime_dir(),
        }
    }
}

impl Default for BinariesConfig {
    fn default() -> Self {
        Self {
            seal: default_seal_binary(),
            swap_oci_hook: default_swap_oci_hook_binary(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            dir: default_policy_dir(),
            timeout_secs: default_policy_timeout(),
        }
    }
}

impl Default for SealSettings {
    fn default() -> Self {
        Self {
            log_level: default_seal_log_level(),
        }
    }
}

impl Config {
    /// Load from `path`, or from [`DEFAULT_CONFIG_PATH`]. Only a missing
    /// default file yields the defaults; an explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_file(path),
            None => Self::load_optional(Path::new(DEFAULT_CONFIG_PATH)),
        }
    }

    fn load_optional(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        Self::load_file(path)
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        logging::parse_level(&self.seal.log_level)?;
        if self.policy.timeout_secs == 0 {
            anyhow::bail!("policy.timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn host_layout(&self) -> HostLayout {
        HostLayout {
            runtime_dir: self.runtime.dir.clone(),
            seal_binary: self.binaries.seal.clone(),
            swap_oci_hook_binary: self.binaries.swap_oci_hook.clone(),
        }
    }

    pub fn policy_timeout(&self) -> Duration {
        Duration::from_secs(self.policy.timeout_secs)
    }
}
