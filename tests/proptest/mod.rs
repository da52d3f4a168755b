// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for volume-admission.
//!
//! Uses proptest to generate random tool pods and verify the admission
//! invariants on the patched result.

#[path = "../common/fixtures.rs"]
mod fixtures;

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::Value;

use fixtures::{
    ContainerBuilder, PodBuilder, admission_request, apply_patch, home_only_policy, test_policy,
};
use volume_admission::AdmissionEngine;
use volume_admission::webhooks::AdmissionResponse;

/// Generated container: which env vars it declares and what it mounts.
#[derive(Clone, Debug)]
struct GeneratedContainer {
    home: bool,
    no_home: bool,
    tool_data_dir: bool,
    env: Option<bool>,
    working_dir: Option<&'static str>,
    mounts_home: Option<bool>,
}

impl GeneratedContainer {
    fn build(&self, index: usize) -> ContainerBuilder {
        let mut container = ContainerBuilder::new(format!("c{}", index));
        match self.env {
            Some(true) => container = container.env("LANG", "C.UTF-8"),
            Some(false) => container = container.empty_env(),
            None => {}
        }
        if self.home {
            container = container.env("HOME", "/custom");
        }
        if self.no_home {
            container = container.env("NO_HOME", "1");
        }
        if self.tool_data_dir {
            container = container.env("TOOL_DATA_DIR", "/custom/data");
        }
        if let Some(dir) = self.working_dir {
            container = container.working_dir(dir);
        }
        match self.mounts_home {
            Some(true) => container = container.mount("home", "/data/project"),
            Some(false) => container = container.empty_mounts(),
            None => {}
        }
        container
    }
}

/// Generated pod shape.
#[derive(Clone, Debug)]
struct GeneratedPod {
    mount_storage: Option<&'static str>,
    home_volume: bool,
    scratch_volume: bool,
    empty_volumes: bool,
    foreign_host_path: Option<(&'static str, &'static str)>,
    node_selector: Option<Option<&'static str>>,
    containers: Vec<GeneratedContainer>,
}

impl GeneratedPod {
    fn build(&self) -> PodBuilder {
        let mut pod = PodBuilder::new("generated");
        if let Some(mode) = self.mount_storage {
            pod = pod.mount_storage(mode);
        }
        if self.empty_volumes {
            pod = pod.empty_volumes();
        }
        if self.home_volume {
            pod = pod.host_path_volume("home", "/data/project");
        }
        if self.scratch_volume {
            pod = pod.volume(serde_json::json!({"name": "scratch", "emptyDir": {}}));
        }
        if let Some((name, path)) = self.foreign_host_path {
            pod = pod.host_path_volume(name, path);
        }
        match self.node_selector {
            Some(Some(key)) => pod = pod.node_selector(key, "true"),
            Some(None) => pod = pod.empty_node_selector(),
            None => {}
        }
        for (i, container) in self.containers.iter().enumerate() {
            pod = pod.container(container.build(i));
        }
        pod
    }
}

fn any_container() -> impl Strategy<Value = GeneratedContainer> {
    (
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        prop::option::of(any::<bool>()),
        prop::option::of(prop_oneof![Just("/srv"), Just("")]),
        prop::option::of(any::<bool>()),
    )
        .prop_map(
            |(home, no_home, tool_data_dir, env, working_dir, mounts_home)| GeneratedContainer {
                home,
                no_home,
                tool_data_dir,
                env,
                working_dir,
                mounts_home,
            },
        )
}

fn valid_mount_storage() -> impl Strategy<Value = Option<&'static str>> {
    prop_oneof![Just(None), Just(Some("all")), Just(Some("none"))]
}

fn any_foreign_host_path() -> impl Strategy<Value = (&'static str, &'static str)> {
    prop_oneof![
        Just(("docker", "/var/run/docker.sock")),
        Just(("home", "/etc")),
        Just(("home", "/data/project/")),
        Just(("root", "/")),
        Just(("etc-ldap", "/etc/ldap")),
    ]
}

fn any_node_selector() -> impl Strategy<Value = Option<Option<&'static str>>> {
    prop_oneof![
        Just(None),
        Just(Some(None)),
        Just(Some(Some("kubernetes.wmcloud.org/nfs-mounted"))),
        Just(Some(Some("foo"))),
    ]
}

/// Pods that pass every policy when reviewed in a tool namespace.
fn admissible_pod() -> impl Strategy<Value = GeneratedPod> {
    (
        valid_mount_storage(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any_node_selector(),
        prop::collection::vec(any_container(), 1..4),
    )
        .prop_map(
            |(mount_storage, home_volume, scratch_volume, empty_volumes, node_selector, containers)| {
                GeneratedPod {
                    mount_storage,
                    home_volume,
                    scratch_volume,
                    empty_volumes,
                    foreign_host_path: None,
                    node_selector,
                    containers,
                }
            },
        )
}

fn tool_namespace() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,20}".prop_map(|name| format!("tool-{}", name))
}

fn non_tool_namespace() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,20}".prop_filter("not a tool namespace", |ns| !ns.starts_with("tool-"))
}

fn review(policy: volume_admission::VolumePolicy, namespace: &str, pod: &Value) -> AdmissionResponse {
    AdmissionEngine::new(Arc::new(policy)).respond(&admission_request(
        namespace,
        "CREATE",
        pod.clone(),
    ))
}

/// Effective value of an env var; the last entry wins.
fn env_value<'a>(container: &'a Value, name: &str) -> Option<&'a Value> {
    container["env"]
        .as_array()?
        .iter()
        .rev()
        .find(|var| var["name"] == name)
        .map(|var| &var["value"])
}

fn env_count(container: &Value, name: &str) -> usize {
    container["env"]
        .as_array()
        .map(|env| env.iter().filter(|var| var["name"] == name).count())
        .unwrap_or_default()
}

proptest! {
    /// Property: a pod carrying any hostPath volume other than the tool homes
    /// is never admitted, whatever else it looks like.
    #[test]
    fn test_foreign_host_path_always_denied(
        spec in admissible_pod(),
        foreign in any_foreign_host_path(),
        namespace in tool_namespace()
    ) {
        let spec = GeneratedPod { foreign_host_path: Some(foreign), ..spec };
        let response = review(test_policy(), &namespace, &spec.build().build_json());

        prop_assert!(!response.allowed);
        prop_assert!(response.patch.is_none());
        prop_assert!(response.result.message.contains("No hostPath volumes allowed"));
    }

    /// Property: pods outside tool namespaces are denied without a patch.
    #[test]
    fn test_non_tool_namespace_denied(
        spec in admissible_pod(),
        namespace in non_tool_namespace()
    ) {
        let response = review(test_policy(), &namespace, &spec.build().build_json());

        prop_assert!(!response.allowed);
        prop_assert!(response.patch.is_none());
    }

    /// Property: admissible pods are allowed and their patch applies cleanly.
    #[test]
    fn test_patch_applies(spec in admissible_pod(), namespace in tool_namespace()) {
        let pod = spec.build().build_json();
        let response = review(test_policy(), &namespace, &pod);

        prop_assert!(response.allowed, "denied: {}", response.result.message);
        apply_patch(&pod, &response);
    }

    /// Property: `mount-storage: none` at most initializes the volume list.
    #[test]
    fn test_mount_none_adds_no_storage(spec in admissible_pod(), namespace in tool_namespace()) {
        let spec = GeneratedPod { mount_storage: Some("none"), ..spec };
        let pod = spec.build().build_json();
        let response = review(test_policy(), &namespace, &pod);

        prop_assert!(response.allowed);
        let patched = apply_patch(&pod, &response);
        prop_assert_eq!(&patched["spec"]["containers"], &pod["spec"]["containers"]);
        prop_assert_eq!(&patched["spec"].get("nodeSelector"), &pod["spec"].get("nodeSelector"));
        prop_assert!(patched["spec"]["volumes"].is_array());
    }

    /// Property: with all volumes requested every container ends up with an
    /// effective TOOL_DATA_DIR pointing at the tool home. A tenant value is
    /// kept but shadowed by the appended one.
    #[test]
    fn test_tool_data_dir_everywhere(spec in admissible_pod(), namespace in tool_namespace()) {
        let spec = GeneratedPod { mount_storage: Some("all"), ..spec };
        let pod = spec.build().build_json();
        let patched = apply_patch(&pod, &review(test_policy(), &namespace, &pod));
        let home = format!("/data/project/{}", namespace.trim_start_matches("tool-"));

        for (container, generated) in patched["spec"]["containers"]
            .as_array()
            .unwrap()
            .iter()
            .zip(&spec.containers)
        {
            let expected_count = if generated.tool_data_dir { 2 } else { 1 };
            prop_assert_eq!(env_count(container, "TOOL_DATA_DIR"), expected_count);
            prop_assert_eq!(env_value(container, "TOOL_DATA_DIR").unwrap(), home.as_str());
        }
    }

    /// Property: HOME is only ever added when neither HOME nor NO_HOME is set,
    /// and NO_HOME containers lose a non-empty working directory.
    #[test]
    fn test_home_precedence(spec in admissible_pod(), namespace in tool_namespace()) {
        let spec = GeneratedPod { mount_storage: Some("all"), ..spec };
        let pod = spec.build().build_json();
        let patched = apply_patch(&pod, &review(test_policy(), &namespace, &pod));
        let home = format!("/data/project/{}", namespace.trim_start_matches("tool-"));

        for (container, generated) in patched["spec"]["containers"]
            .as_array()
            .unwrap()
            .iter()
            .zip(&spec.containers)
        {
            if generated.home {
                prop_assert_eq!(env_count(container, "HOME"), 1);
                prop_assert_eq!(env_value(container, "HOME").unwrap(), "/custom");
            } else if generated.no_home {
                prop_assert_eq!(env_count(container, "HOME"), 0);
            } else {
                prop_assert_eq!(env_value(container, "HOME").unwrap(), home.as_str());
            }

            if generated.no_home && generated.working_dir == Some("/srv") {
                prop_assert!(container.get("workingDir").is_none());
            } else if let Some(dir) = generated.working_dir {
                prop_assert_eq!(&container["workingDir"], dir);
            }
        }
    }

    /// Property: reviewing an already patched pod changes nothing more.
    #[test]
    fn test_second_review_is_empty(spec in admissible_pod(), namespace in tool_namespace()) {
        let spec = GeneratedPod { mount_storage: Some("all"), ..spec };
        let pod = spec.build().build_json();
        let patched = apply_patch(&pod, &review(home_only_policy(), &namespace, &pod));
        let second = review(home_only_policy(), &namespace, &patched);

        prop_assert!(second.allowed, "denied: {}", second.result.message);
        prop_assert!(second.patch.is_none());
    }

    /// Property: every mount-all review pins the pod to NFS nodes.
    #[test]
    fn test_nfs_label_always_set(spec in admissible_pod(), namespace in tool_namespace()) {
        let spec = GeneratedPod { mount_storage: None, ..spec };
        let pod = spec.build().build_json();
        let patched = apply_patch(&pod, &review(test_policy(), &namespace, &pod));

        prop_assert_eq!(
            &patched["spec"]["nodeSelector"]["kubernetes.wmcloud.org/nfs-mounted"],
            "true"
        );
    }
}
