//! Container mutator.
//!
//! Runs once per container-creation event. For pods carrying the opt-in
//! label it prepares host-side state (placeholders, policy file) and returns
//! the adjustment that wires the launcher and the swap hook into the
//! container.
//!
//! Host state for a container lives under
//! `<runtime>/<pod id>/<container name>/`, so concurrent events for different
//! containers never touch the same files. Every write is an idempotent
//! overwrite: the runtime may redeliver an event.

pub mod adjustment;
pub mod filesystem;
pub mod plugin;
pub mod store;

use std::path::PathBuf;
use std::time::Duration;

pub use adjustment::{ContainerAdjustment, Hook, Hooks, KeyValue, Mount, build_adjustment};
pub use plugin::{Container, Plugin, PodSandbox};
pub use store::{FilePolicyStore, PolicyStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum MutatorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to get LandlockProfile '{name}': {source}")]
    Store {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("timed out after {timeout:?} getting LandlockProfile '{name}'")]
    StoreTimeout { name: String, timeout: Duration },

    #[error("{action} '{}': {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode landlock profile for '{}': {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl MutatorError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| MutatorError::Io {
            action,
            path,
            source,
        }
    }
}
