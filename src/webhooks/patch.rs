//! JSON Patch (RFC 6902) model and the patch builder for tool pods.
//!
//! The builder never mutates the pod. It emits operations in an order where
//! every append (`.../-`) targets an array that either existed on the pod or
//! was created by an earlier operation in the same patch.

use std::borrow::Cow;
use std::fmt;

use k8s_openapi::api::core::v1::{
    Container, EnvVar, HostPathVolumeSource, Pod, Volume, VolumeMount,
};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use super::error::AdmissionError;
use super::inspect;
use super::policies::{MountMode, ValidatedPod};
use crate::config::{
    HOME_ENV, NFS_MOUNTED_LABEL, NO_HOME_ENV, TOOL_DATA_DIR_ENV, TOOL_HOME_BASE, VolumeDescriptor,
    VolumePolicy,
};

/// Escape one JSON Pointer reference token (`~` → `~0`, `/` → `~1`).
pub fn escape_pointer_segment(segment: &str) -> Cow<'_, str> {
    if segment.contains(['~', '/']) {
        Cow::Owned(segment.replace('~', "~0").replace('/', "~1"))
    } else {
        Cow::Borrowed(segment)
    }
}

/// Join reference tokens into a JSON Pointer, escaping each one.
pub fn pointer<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    segments.into_iter().fold(String::new(), |mut path, segment| {
        path.push('/');
        path.push_str(&escape_pointer_segment(segment));
        path
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

impl fmt::Display for PatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PatchOp::Add => "add",
            PatchOp::Remove => "remove",
            PatchOp::Replace => "replace",
        })
    }
}

/// Every payload shape the builder emits.
#[derive(Clone, Debug, PartialEq)]
pub enum PatchValue {
    EmptyList,
    EmptyMap,
    Volume(Volume),
    VolumeMount(VolumeMount),
    EnvVar(EnvVar),
    Text(String),
}

impl PatchValue {
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        match self {
            PatchValue::EmptyList => Ok(Value::Array(Vec::new())),
            PatchValue::EmptyMap => Ok(Value::Object(serde_json::Map::new())),
            PatchValue::Volume(volume) => serde_json::to_value(volume),
            PatchValue::VolumeMount(mount) => serde_json::to_value(mount),
            PatchValue::EnvVar(env) => serde_json::to_value(env),
            PatchValue::Text(text) => Ok(Value::String(text.clone())),
        }
    }

    /// Name of the env var carried by this payload, if any.
    pub fn env_name(&self) -> Option<&str> {
        match self {
            PatchValue::EnvVar(env) => Some(&env.name),
            _ => None,
        }
    }
}

impl Serialize for PatchValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PatchValue::EmptyList => serializer.collect_seq(std::iter::empty::<()>()),
            PatchValue::EmptyMap => serializer.serialize_map(Some(0))?.end(),
            PatchValue::Volume(volume) => volume.serialize(serializer),
            PatchValue::VolumeMount(mount) => mount.serialize(serializer),
            PatchValue::EnvVar(env) => env.serialize(serializer),
            PatchValue::Text(text) => serializer.serialize_str(text),
        }
    }
}

/// A single RFC 6902 operation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<PatchValue>,
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: PatchValue) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
        }
    }

    pub fn replace(path: impl Into<String>, value: PatchValue) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value),
        }
    }

    /// Whether this operation appends to an array.
    pub fn is_append(&self) -> bool {
        self.op == PatchOp::Add && self.path.ends_with("/-")
    }

    /// Convert into the json-patch representation carried by admission responses.
    pub fn to_json_patch(&self) -> Result<json_patch::PatchOperation, AdmissionError> {
        let path = jsonptr::PointerBuf::parse(self.path.as_str())
            .map_err(|e| AdmissionError::Encoding(format!("invalid path {}: {}", self.path, e)))?;
        let value = || -> Result<Value, AdmissionError> {
            match &self.value {
                Some(value) => Ok(value.to_json()?),
                None => Err(AdmissionError::Encoding(format!(
                    "{} {} has no value",
                    self.op, self.path
                ))),
            }
        };

        Ok(match self.op {
            PatchOp::Add => json_patch::PatchOperation::Add(json_patch::AddOperation {
                path,
                value: value()?,
            }),
            PatchOp::Remove => {
                json_patch::PatchOperation::Remove(json_patch::RemoveOperation { path })
            }
            PatchOp::Replace => {
                json_patch::PatchOperation::Replace(json_patch::ReplaceOperation {
                    path,
                    value: value()?,
                })
            }
        })
    }
}

impl fmt::Display for PatchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.path)
    }
}

/// Convert a whole operation list into a json-patch document.
pub fn to_json_patch(operations: &[PatchOperation]) -> Result<json_patch::Patch, AdmissionError> {
    operations
        .iter()
        .map(PatchOperation::to_json_patch)
        .collect::<Result<Vec<_>, _>>()
        .map(json_patch::Patch)
}

/// Home directory of a tool.
pub fn tool_home(tenant: &str) -> String {
    format!("{}/{}", TOOL_HOME_BASE, tenant)
}

fn container_path(index: usize, field: &str) -> String {
    pointer(["spec", "containers", &index.to_string(), field])
}

fn host_path_volume(descriptor: &VolumeDescriptor) -> Volume {
    Volume {
        name: descriptor.name.clone(),
        host_path: Some(HostPathVolumeSource {
            path: descriptor.path.clone(),
            type_: descriptor
                .host_path_type
                .map(|t| t.as_str().to_string()),
        }),
        ..Default::default()
    }
}

fn volume_mount(descriptor: &VolumeDescriptor) -> VolumeMount {
    VolumeMount {
        mount_path: descriptor.path.clone(),
        name: descriptor.name.clone(),
        read_only: Some(descriptor.read_only),
        ..Default::default()
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

/// Builds the ordered patch turning a validated pod into a tool pod.
pub struct PatchBuilder<'a> {
    policy: &'a VolumePolicy,
    validated: &'a ValidatedPod,
    pod: &'a Pod,
    operations: Vec<PatchOperation>,
}

impl<'a> PatchBuilder<'a> {
    pub fn new(policy: &'a VolumePolicy, validated: &'a ValidatedPod, pod: &'a Pod) -> Self {
        Self {
            policy,
            validated,
            pod,
            operations: Vec::new(),
        }
    }

    pub fn build(mut self) -> Vec<PatchOperation> {
        if self.validated.needs_volume_init {
            self.push(PatchOperation::add("/spec/volumes", PatchValue::EmptyList));
        }

        if self.validated.mount_mode == MountMode::None {
            return self.operations;
        }

        self.init_volume_mounts();
        self.add_volumes();
        self.add_env();
        self.add_node_selector();
        self.operations
    }

    fn push(&mut self, operation: PatchOperation) {
        self.operations.push(operation);
    }

    fn containers(&self) -> impl Iterator<Item = (usize, &'a Container)> + use<'a> {
        inspect::containers(self.pod).iter().enumerate()
    }

    fn init_volume_mounts(&mut self) {
        for (i, container) in self.containers() {
            if container.volume_mounts.is_none() {
                self.push(PatchOperation::add(
                    container_path(i, "volumeMounts"),
                    PatchValue::EmptyList,
                ));
            }
        }
    }

    fn add_volumes(&mut self) {
        let policy = self.policy;
        for descriptor in policy.iter() {
            // Already injected, possibly by an earlier pass of this webhook
            if inspect::has_volume_named(self.pod, &descriptor.name) {
                continue;
            }

            self.push(PatchOperation::add(
                "/spec/volumes/-",
                PatchValue::Volume(host_path_volume(descriptor)),
            ));

            for (i, container) in self.containers() {
                if inspect::has_mount_at_path(container, &descriptor.path) {
                    continue;
                }
                self.push(PatchOperation::add(
                    pointer(["spec", "containers", &i.to_string(), "volumeMounts", "-"]),
                    PatchValue::VolumeMount(volume_mount(descriptor)),
                ));
            }
        }
    }

    fn add_env(&mut self) {
        let home = tool_home(&self.validated.tenant);

        for (i, container) in self.containers() {
            if container.env.is_none() {
                self.push(PatchOperation::add(
                    container_path(i, "env"),
                    PatchValue::EmptyList,
                ));
            }

            let no_home = inspect::has_env_var(container, NO_HOME_ENV);
            let skip_home = no_home || inspect::has_env_var(container, HOME_ENV);

            // Without a managed home the image decides the working directory
            if no_home && container.working_dir.as_deref().is_some_and(|d| !d.is_empty()) {
                self.push(PatchOperation::remove(container_path(i, "workingDir")));
            }

            let env_append = pointer(["spec", "containers", &i.to_string(), "env", "-"]);
            if !skip_home {
                self.push(PatchOperation::add(
                    env_append.clone(),
                    PatchValue::EnvVar(env_var(HOME_ENV, &home)),
                ));
            }

            // Appended after any tenant value so the managed one wins
            if inspect::env_var_value(container, TOOL_DATA_DIR_ENV) != Some(home.as_str()) {
                self.push(PatchOperation::add(
                    env_append,
                    PatchValue::EnvVar(env_var(TOOL_DATA_DIR_ENV, &home)),
                ));
            }
        }
    }

    fn add_node_selector(&mut self) {
        if !inspect::has_node_selector(self.pod) {
            self.push(PatchOperation::add("/spec/nodeSelector", PatchValue::EmptyMap));
        } else if inspect::has_node_selector_key(self.pod, NFS_MOUNTED_LABEL) {
            return;
        }

        self.push(PatchOperation::add(
            pointer(["spec", "nodeSelector", NFS_MOUNTED_LABEL]),
            PatchValue::Text("true".to_string()),
        ));
    }
}
