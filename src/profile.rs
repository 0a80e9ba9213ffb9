//! Declarative filesystem policy types.
//!
//! A [`Profile`] lists the paths a binary may touch, grouped by access level.
//! Profiles are keyed by absolute binary path ([`ProfileByBinary`]) and, in the
//! cluster-resident [`LandlockProfile`] object, by container name.
//!
//! The JSON shape written into containers is:
//!
//! ```json
//! {
//!   "/usr/bin/curl": {
//!     "readOnly": ["/etc"],
//!     "readWrite": ["/tmp"]
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Paths a single binary may access, grouped by access level.
///
/// Paths are expected to be absolute and clean. Validation happens upstream,
/// before the policy is persisted; consumers here never rely on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_only: Vec<PathBuf>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_write: Vec<PathBuf>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_exec: Vec<PathBuf>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_write_exec: Vec<PathBuf>,
}

impl Profile {
    /// True when no path is configured at any level.
    pub fn is_empty(&self) -> bool {
        self.read_only.is_empty()
            && self.read_write.is_empty()
            && self.read_exec.is_empty()
            && self.read_write_exec.is_empty()
    }
}

/// Absolute binary path → profile applied when that binary runs.
pub type ProfileByBinary = BTreeMap<PathBuf, Profile>;

/// Name of the pod label that opts a pod into sandboxing. Its value names the
/// [`LandlockProfile`] object (in the pod's namespace) to apply.
pub const POD_PROFILE_LABEL: &str = "podlock.kubewarden.io/profile";

/// Object metadata of a policy object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LandlockProfileSpec {
    /// Container name → per-binary profiles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles_by_container: Option<BTreeMap<String, ProfileByBinary>>,
}

/// The cluster-resident policy object consumed by the container mutator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandlockProfile {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: LandlockProfileSpec,
}

impl LandlockProfile {
    /// Profiles for one container, if the object defines any.
    pub fn profiles_for_container(&self, container: &str) -> Option<&ProfileByBinary> {
        self.spec
            .profiles_by_container
            .as_ref()
            .and_then(|by_container| by_container.get(container))
    }
}
