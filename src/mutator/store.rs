//! Access to LandlockProfile policy objects.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::profile::LandlockProfile;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("LandlockProfile {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    #[error("policy store unreachable: {0}")]
    Unreachable(String),

    #[error("cannot parse '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

/// Read-only lookup of policy objects by namespace and name.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<LandlockProfile, StoreError>;
}

/// Policy objects stored as `<root>/<namespace>/<name>.{yaml,yml,json}`.
#[derive(Debug, Clone)]
pub struct FilePolicyStore {
    root: PathBuf,
}

const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

impl FilePolicyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self, namespace: &str, name: &str) -> Vec<PathBuf> {
        let dir = self.root.join(namespace);
        EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{name}.{ext}")))
            .collect()
    }
}

/// Names become path components; anything that could step out of the store
/// root is treated as absent.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\0'])
}

#[async_trait]
impl PolicyStore for FilePolicyStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<LandlockProfile, StoreError> {
        let not_found = || StoreError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        if !is_plain_name(namespace) || !is_plain_name(name) {
            return Err(not_found());
        }

        for path in self.candidates(namespace, name) {
            let data = match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StoreError::Unreachable(format!(
                        "cannot read '{}': {e}",
                        path.display()
                    )));
                }
            };
            debug!(path = %path.display(), "loading LandlockProfile");

            // YAML is a superset of JSON, one parser covers every extension
            let mut profile: LandlockProfile =
                serde_yaml::from_slice(&data).map_err(|e| StoreError::Parse {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            if profile.metadata.name.is_empty() {
                profile.metadata.name = name.to_string();
            }
            if profile.metadata.namespace.is_empty() {
                profile.metadata.namespace = namespace.to_string();
            }
            return Ok(profile);
        }

        Err(not_found())
    }
}
