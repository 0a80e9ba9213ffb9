//! Container creation and removal handlers.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::adjustment::{ContainerAdjustment, build_adjustment};
use super::filesystem;
use super::store::PolicyStore;
use super::MutatorError;
use crate::paths::HostLayout;
use crate::profile::POD_PROFILE_LABEL;

/// Pod metadata as delivered by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSandbox {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub id: String,
    pub name: String,
}

pub struct Plugin<S> {
    store: S,
    layout: HostLayout,
    log_level: String,
    store_timeout: Duration,
}

/// Pod IDs and container names become directory names under the runtime
/// dir.
fn check_component(what: &str, value: &str) -> Result<(), MutatorError> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\0']) {
        return Err(MutatorError::InvalidRequest(format!("invalid {what} '{value}'")));
    }
    Ok(())
}

impl<S: PolicyStore> Plugin<S> {
    pub fn new(store: S, layout: HostLayout, log_level: impl Into<String>, store_timeout: Duration) -> Self {
        Self {
            store,
            layout,
            log_level: log_level.into(),
            store_timeout,
        }
    }

    pub fn layout(&self) -> &HostLayout {
        &self.layout
    }

    /// Prepare host state and build the adjustment for a new container.
    ///
    /// `Ok(None)` means the container is left untouched: the pod did not opt
    /// in, or its policy has nothing for this container.
    pub async fn create_container(
        &self,
        pod: &PodSandbox,
        container: &Container,
    ) -> Result<Option<ContainerAdjustment>, MutatorError> {
        let Some(profile_name) = pod.labels.get(POD_PROFILE_LABEL) else {
            debug!(pod = %pod.name, namespace = %pod.namespace, "no podlock label found on pod, skipping mutation");
            return Ok(None);
        };
        check_component("pod id", &pod.id)?;
        check_component("container name", &container.name)?;

        let policy = tokio::time::timeout(
            self.store_timeout,
            self.store.get(&pod.namespace, profile_name),
        )
        .await
        .map_err(|_| MutatorError::StoreTimeout {
            name: profile_name.clone(),
            timeout: self.store_timeout,
        })?
        .map_err(|source| MutatorError::Store {
            name: profile_name.clone(),
            source,
        })?;

        let Some(profiles) = policy.profiles_for_container(&container.name) else {
            info!(
                pod = %pod.name,
                namespace = %pod.namespace,
                profile = %profile_name,
                container = %container.name,
                "no profile found for container"
            );
            return Ok(None);
        };

        filesystem::reserve_swapped_binaries(&self.layout, &pod.id, &container.name, profiles)?;
        filesystem::write_profile(&self.layout, &pod.id, &container.name, profiles)?;

        let adjustment = build_adjustment(
            &self.layout,
            &pod.id,
            &container.name,
            profiles,
            &self.log_level,
        );
        info!(
            pod = %pod.name,
            namespace = %pod.namespace,
            container = %container.name,
            binaries = profiles.len(),
            "podlock label found, mutation requested"
        );
        debug!(adjustment = ?adjustment, "container adjustment");

        Ok(Some(adjustment))
    }

    /// Remove everything kept for the container's pod.
    pub async fn remove_container(&self, pod: &PodSandbox, container: &Container) -> Result<(), MutatorError> {
        check_component("pod id", &pod.id)?;
        filesystem::remove_pod_dir(&self.layout, &pod.id)?;
        info!(
            pod = %pod.name,
            namespace = %pod.namespace,
            container = %container.name,
            "cleaned up podlock runtime dir"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutator::store::{MockPolicyStore, StoreError};
    use crate::profile::{LandlockProfile, LandlockProfileSpec, Profile, ProfileByBinary};
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};

    fn layout_in(root: &Path) -> HostLayout {
        HostLayout {
            runtime_dir: root.join("run"),
            ..HostLayout::default()
        }
    }

    fn pod(labelled: bool) -> PodSandbox {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "web".to_string());
        if labelled {
            labels.insert(POD_PROFILE_LABEL.to_string(), "curl-profile".to_string());
        }
        PodSandbox {
            id: "pod123".to_string(),
            name: "web-0".to_string(),
            namespace: "default".to_string(),
            labels,
        }
    }

    fn container(name: &str) -> Container {
        Container {
            id: "c1".to_string(),
            name: name.to_string(),
        }
    }

    fn policy(binaries: &[&str]) -> LandlockProfile {
        let by_binary: ProfileByBinary = binaries
            .iter()
            .map(|b| {
                (
                    PathBuf::from(b),
                    Profile {
                        read_only: vec![PathBuf::from("/etc")],
                        ..Profile::default()
                    },
                )
            })
            .collect();
        let mut by_container = BTreeMap::new();
        by_container.insert("web".to_string(), by_binary);
        LandlockProfile {
            spec: LandlockProfileSpec {
                profiles_by_container: Some(by_container),
            },
            ..LandlockProfile::default()
        }
    }

    fn store_returning(profile: LandlockProfile) -> MockPolicyStore {
        let mut store = MockPolicyStore::new();
        store
            .expect_get()
            .withf(|ns: &str, name: &str| ns == "default" && name == "curl-profile")
            .times(1)
            .returning(move |_, _| Ok(profile.clone()));
        store
    }

    fn plugin<S: PolicyStore>(store: S, root: &Path) -> Plugin<S> {
        Plugin::new(store, layout_in(root), "debug", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_unlabelled_pod_is_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        // no expectations: any store call fails the test
        let plugin = plugin(MockPolicyStore::new(), tmp.path());

        let result = plugin.create_container(&pod(false), &container("web")).await.unwrap();
        assert!(result.is_none());
        assert!(!tmp.path().join("run").exists());
    }

    #[tokio::test]
    async fn test_missing_policy_blocks_creation() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = MockPolicyStore::new();
        store.expect_get().times(1).returning(|ns, name| {
            Err(StoreError::NotFound {
                namespace: ns.to_string(),
                name: name.to_string(),
            })
        });
        let plugin = plugin(store, tmp.path());

        let err = plugin.create_container(&pod(true), &container("web")).await.unwrap_err();
        assert!(matches!(
            err,
            MutatorError::Store {
                source: StoreError::NotFound { .. },
                ..
            }
        ));
        assert!(!tmp.path().join("run").exists());
    }

    #[tokio::test]
    async fn test_container_without_profile_is_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin = plugin(store_returning(policy(&["/usr/bin/curl"])), tmp.path());

        let result = plugin.create_container(&pod(true), &container("sidecar")).await.unwrap();
        assert!(result.is_none());
        assert!(!tmp.path().join("run").exists());
    }

    #[tokio::test]
    async fn test_policy_without_containers_is_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin = plugin(store_returning(LandlockProfile::default()), tmp.path());

        let result = plugin.create_container(&pod(true), &container("web")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_create_container_prepares_host_and_adjusts() {
        let tmp = tempfile::tempdir().unwrap();
        let binaries = ["/usr/bin/curl", "/bin/sh", "/app"];
        let plugin = plugin(store_returning(policy(&binaries)), tmp.path());

        let adj = plugin
            .create_container(&pod(true), &container("web"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(adj.hooks.create_container.len(), 3);
        assert_eq!(adj.mounts.len(), 5);
        assert_eq!(adj.env[0].value, "debug");

        // every mount source exists before the adjustment is returned
        let layout = plugin.layout();
        for mount in &adj.mounts {
            if mount.source != layout.seal_binary {
                assert!(mount.source.exists(), "{}", mount.source.display());
            }
        }

        let targets: HashSet<&str> = adj
            .hooks
            .create_container
            .iter()
            .map(|h| h.args[2].as_str())
            .collect();
        assert_eq!(targets, binaries.into_iter().collect());

        let written: ProfileByBinary = serde_json::from_slice(
            &std::fs::read(layout.profile_path("pod123", "web")).unwrap(),
        )
        .unwrap();
        assert_eq!(written.len(), 3);
    }

    #[tokio::test]
    async fn test_remove_container_cleans_pod_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin = plugin(store_returning(policy(&["/app"])), tmp.path());
        plugin.create_container(&pod(true), &container("web")).await.unwrap();
        assert!(tmp.path().join("run/pod123/web/profile.json").exists());

        plugin.remove_container(&pod(true), &container("web")).await.unwrap();
        assert!(!tmp.path().join("run/pod123").exists());
        assert!(tmp.path().join("run").exists());

        // already gone
        plugin.remove_container(&pod(true), &container("web")).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_like_identifiers() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin = plugin(MockPolicyStore::new(), tmp.path());

        let mut bad_pod = pod(true);
        bad_pod.id = String::new();
        assert!(matches!(
            plugin.remove_container(&bad_pod, &container("web")).await.unwrap_err(),
            MutatorError::InvalidRequest(_)
        ));
        assert!(matches!(
            plugin.create_container(&pod(true), &container("../x")).await.unwrap_err(),
            MutatorError::InvalidRequest(_)
        ));
    }

    struct SlowStore;

    #[async_trait::async_trait]
    impl PolicyStore for SlowStore {
        async fn get(&self, _namespace: &str, _name: &str) -> Result<LandlockProfile, StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(LandlockProfile::default())
        }
    }

    #[tokio::test]
    async fn test_store_deadline() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin = Plugin::new(SlowStore, layout_in(tmp.path()), "info", Duration::from_millis(50));

        let err = plugin.create_container(&pod(true), &container("web")).await.unwrap_err();
        assert!(matches!(err, MutatorError::StoreTimeout { .. }));
    }
}
