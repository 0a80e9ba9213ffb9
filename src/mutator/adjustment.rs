//! The adjustment handed back to the runtime: extra mounts, hooks and
//! environment for one container.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::paths::{self, HostLayout};
use crate::profile::ProfileByBinary;
use crate::seal::LOG_LEVEL_ENV_VAR;

/// Name the hook is invoked under (its `argv[0]`).
pub const SWAP_HOOK_NAME: &str = "swap-oci-hook";

/// Options of every injected mount: private read-only bind.
pub const BIND_MOUNT_OPTIONS: [&str; 3] = ["rprivate", "rbind", "ro"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mount {
    pub destination: PathBuf,
    pub source: PathBuf,
    #[serde(rename = "type")]
    pub kind: String,
    pub options: Vec<String>,
}

impl Mount {
    /// Read-only bind mount of `source` at `destination`.
    pub fn read_only_bind(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            source: source.into(),
            kind: "bind".to_string(),
            options: BIND_MOUNT_OPTIONS.iter().map(|o| o.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hook {
    pub path: PathBuf,
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
}

/// Hooks by OCI lifecycle stage.
///
/// Swap hooks go in `createContainer`: the runtime runs those with the
/// container's mount namespace and root filesystem in place, before the
/// user process starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hooks {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub create_container: Vec<Hook>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerAdjustment {
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub env: Vec<KeyValue>,
    #[serde(default)]
    pub hooks: Hooks,
}

/// Build the adjustment for one container.
///
/// The placeholders and policy file it mounts must already exist on the
/// host; see [`super::filesystem`].
pub fn build_adjustment(
    layout: &HostLayout,
    pod_id: &str,
    container: &str,
    profiles: &ProfileByBinary,
    log_level: &str,
) -> ContainerAdjustment {
    let mut adjustment = ContainerAdjustment::default();

    adjustment.mounts.push(Mount::read_only_bind(
        &layout.seal_binary,
        paths::CONTAINER_SEAL_BINARY,
    ));
    adjustment.mounts.push(Mount::read_only_bind(
        layout.profile_path(pod_id, container),
        paths::container_profile_path(),
    ));

    for binary in profiles.keys() {
        let in_container = paths::swapped_binary_path_in_container(binary);
        adjustment.mounts.push(Mount::read_only_bind(
            layout.swapped_binary_path(pod_id, container, binary),
            &in_container,
        ));
        adjustment
            .hooks
            .create_container
            .push(swap_hook(&layout.swap_oci_hook_binary, binary, &in_container));
    }

    adjustment.env.push(KeyValue {
        key: LOG_LEVEL_ENV_VAR.to_string(),
        value: log_level.to_string(),
    });

    adjustment
}

fn swap_hook(hook_binary: &Path, target: &Path, backup: &Path) -> Hook {
    Hook {
        path: hook_binary.to_path_buf(),
        args: vec![
            SWAP_HOOK_NAME.to_string(),
            "-target".to_string(),
            target.to_string_lossy().into_owned(),
            "-backup".to_string(),
            backup.to_string_lossy().into_owned(),
        ],
        env: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Profile;
    use std::collections::HashSet;

    fn layout() -> HostLayout {
        HostLayout::default()
    }

    fn profiles(binaries: &[&str]) -> ProfileByBinary {
        binaries
            .iter()
            .map(|b| (PathBuf::from(b), Profile::default()))
            .collect()
    }

    #[test]
    fn test_adjustment_for_one_binary() {
        let adj = build_adjustment(&layout(), "pod123", "ctr1", &profiles(&["/usr/bin/curl"]), "debug");

        assert_eq!(
            adj.mounts,
            vec![
                Mount::read_only_bind("/opt/podlock/bin/seal", "/.podlock/bin/seal"),
                Mount::read_only_bind("/var/run/podlock/pod123/ctr1/profile.json", "/.podlock/profile.json"),
                Mount::read_only_bind(
                    "/var/run/podlock/pod123/ctr1/swapped-binaries/usr/bin/curl",
                    "/.podlock/swapped-binaries/usr/bin/curl",
                ),
            ]
        );
        assert_eq!(
            adj.hooks.create_container,
            vec![Hook {
                path: PathBuf::from("/opt/podlock/bin/swap-oci-hook"),
                args: vec![
                    "swap-oci-hook".into(),
                    "-target".into(),
                    "/usr/bin/curl".into(),
                    "-backup".into(),
                    "/.podlock/swapped-binaries/usr/bin/curl".into(),
                ],
                env: vec![],
            }]
        );
        assert_eq!(
            adj.env,
            vec![KeyValue {
                key: "SEAL_LOG_LEVEL".into(),
                value: "debug".into()
            }]
        );
    }

    #[test]
    fn test_adjustment_counts_for_n_binaries() {
        let binaries = ["/usr/bin/curl", "/bin/sh", "/app/server"];
        let adj = build_adjustment(&layout(), "pod", "ctr", &profiles(&binaries), "info");

        assert_eq!(adj.hooks.create_container.len(), binaries.len());
        assert_eq!(adj.mounts.len(), binaries.len() + 2);

        // order across binaries is unspecified; compare as sets
        let targets: HashSet<&str> = adj
            .hooks
            .create_container
            .iter()
            .map(|h| h.args[2].as_str())
            .collect();
        assert_eq!(targets, binaries.into_iter().collect());

        let destinations: HashSet<PathBuf> = adj.mounts.iter().map(|m| m.destination.clone()).collect();
        for binary in binaries {
            assert!(destinations.contains(&paths::swapped_binary_path_in_container(Path::new(binary))));
        }
        for mount in &adj.mounts {
            assert_eq!(mount.kind, "bind");
            assert_eq!(mount.options, ["rprivate", "rbind", "ro"]);
        }
    }

    #[test]
    fn test_adjustment_json_shape() {
        let adj = build_adjustment(&layout(), "pod", "ctr", &profiles(&["/app"]), "info");
        let json = serde_json::to_value(&adj).unwrap();

        assert_eq!(json["mounts"][0]["type"], "bind");
        assert_eq!(json["hooks"]["createContainer"][0]["args"][1], "-target");
        assert_eq!(json["env"][0]["key"], "SEAL_LOG_LEVEL");
        assert!(json["hooks"]["createContainer"][0].get("env").is_none());
    }
}
