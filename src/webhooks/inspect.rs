//! Read-only queries over a decoded Pod.
//!
//! Absent lists and maps behave like empty ones, so every query is total.

use k8s_openapi::api::core::v1::{Container, Pod, Volume};

/// Label value, or `default` when the label is not set.
pub fn label_or_default<'a>(pod: &'a Pod, key: &str, default: &'a str) -> &'a str {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .map(String::as_str)
        .unwrap_or(default)
}

pub fn volumes(pod: &Pod) -> &[Volume] {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_deref())
        .unwrap_or_default()
}

pub fn containers(pod: &Pod) -> &[Container] {
    pod.spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default()
}

pub fn has_volume_named(pod: &Pod, name: &str) -> bool {
    volumes(pod).iter().any(|v| v.name == name)
}

pub fn has_mount_at_path(container: &Container, path: &str) -> bool {
    container
        .volume_mounts
        .iter()
        .flatten()
        .any(|m| m.mount_path == path)
}

pub fn has_env_var(container: &Container, name: &str) -> bool {
    container.env.iter().flatten().any(|e| e.name == name)
}

/// Effective value of an env var. With duplicates the last entry wins, as in
/// the kubelet.
pub fn env_var_value<'a>(container: &'a Container, name: &str) -> Option<&'a str> {
    container
        .env
        .iter()
        .flatten()
        .rev()
        .find(|e| e.name == name)
        .map(|e| e.value.as_deref().unwrap_or_default())
}

/// Whether the pod spec carries a node selector map at all.
pub fn has_node_selector(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .is_some_and(|spec| spec.node_selector.is_some())
}

pub fn has_node_selector_key(pod: &Pod, key: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_selector.as_ref())
        .is_some_and(|selector| selector.contains_key(key))
}
