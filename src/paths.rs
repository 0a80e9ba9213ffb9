//! Filesystem layout shared by the host-side mutator, the OCI hook and the
//! sealing launcher.
//!
//! Two trees exist:
//! 1. Inside every sandboxed container, a fixed `/.podlock/` tree holding the
//!    launcher binary, the policy file and the relocated original binaries.
//! 2. On the host, a runtime directory keyed by pod ID and container name that
//!    backs the bind mounts of the first tree.
//!
//! All paths are absolute. Binary paths are mirrored under the relocation
//! roots by stripping their leading `/`, so `/usr/bin/curl` becomes
//! `/.podlock/swapped-binaries/usr/bin/curl`.

use std::path::{Component, Path, PathBuf};

/// Root of the podlock tree inside containers.
pub const CONTAINER_DATA_DIR: &str = "/.podlock";

/// Root under which original binaries are relocated inside containers.
pub const CONTAINER_SWAPPED_BINARIES_DIR: &str = "/.podlock/swapped-binaries";

/// Launcher binary inside containers.
pub const CONTAINER_SEAL_BINARY: &str = "/.podlock/bin/seal";

/// Name of the per-container policy file.
pub const PROFILE_FILE_NAME: &str = "profile.json";

/// Name of the directory holding the placeholders on the host.
const SWAPPED_BINARIES_DIR_NAME: &str = "swapped-binaries";

/// Policy file path inside containers.
pub fn container_profile_path() -> PathBuf {
    Path::new(CONTAINER_DATA_DIR).join(PROFILE_FILE_NAME)
}

/// Where the original binary is relocated inside the container.
///
/// `/usr/bin/curl` → `/.podlock/swapped-binaries/usr/bin/curl`
pub fn swapped_binary_path_in_container(binary: &Path) -> PathBuf {
    mirror_under(Path::new(CONTAINER_SWAPPED_BINARIES_DIR), binary)
}

/// Join `path` below `root`, treating `path` as relative even when absolute.
///
/// `..` components are resolved lexically and never climb above `root`.
pub fn mirror_under(root: &Path, path: &Path) -> PathBuf {
    let mut out = root.to_path_buf();
    let depth = out.components().count();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                if out.components().count() > depth {
                    out.pop();
                }
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

/// Lexically normalize a path: drop `.`, resolve `..`, collapse separators.
///
/// No filesystem access; symlinks are not followed.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !path.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Host-side runtime tree, keyed by pod ID and container name.
///
/// Created once from configuration and shared read-only by every
/// container-creation event. Distinct pod/container pairs never share a path.
#[derive(Debug, Clone)]
pub struct HostLayout {
    /// Runtime root, e.g. `/var/run/podlock`.
    pub runtime_dir: PathBuf,

    /// Launcher binary installed on the host.
    pub seal_binary: PathBuf,

    /// OCI hook binary installed on the host.
    pub swap_oci_hook_binary: PathBuf,
}

impl Default for HostLayout {
    fn default() -> Self {
        Self {
            runtime_dir: PathBuf::from("/var/run/podlock"),
            seal_binary: PathBuf::from("/opt/podlock/bin/seal"),
            swap_oci_hook_binary: PathBuf::from("/opt/podlock/bin/swap-oci-hook"),
        }
    }
}

impl HostLayout {
    /// Everything podlock keeps for one pod: runtime_dir/{pod_id}
    pub fn pod_dir(&self, pod_id: &str) -> PathBuf {
        mirror_under(&self.runtime_dir, Path::new(pod_id))
    }

    /// Everything podlock keeps for one container: runtime_dir/{pod_id}/{container}
    pub fn container_dir(&self, pod_id: &str, container: &str) -> PathBuf {
        mirror_under(&self.pod_dir(pod_id), Path::new(container))
    }

    /// Policy file on the host: runtime_dir/{pod_id}/{container}/profile.json
    pub fn profile_path(&self, pod_id: &str, container: &str) -> PathBuf {
        self.container_dir(pod_id, container).join(PROFILE_FILE_NAME)
    }

    /// Placeholder backing the relocated binary:
    /// runtime_dir/{pod_id}/{container}/swapped-binaries/{binary}
    pub fn swapped_binary_path(&self, pod_id: &str, container: &str, binary: &Path) -> PathBuf {
        mirror_under(
            &self
                .container_dir(pod_id, container)
                .join(SWAPPED_BINARIES_DIR_NAME),
            binary,
        )
    }
}
