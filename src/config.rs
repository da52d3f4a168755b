//! Process configuration and the Toolforge volume policy.
//!
//! The volume policy is loaded once at startup and shared read-only by every
//! admission request. Everything else is read from environment variables with
//! defaults suitable for the in-cluster deployment.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label a pod can set to opt in or out of the managed storage.
pub const MOUNT_STORAGE_LABEL: &str = "toolforge.org/mount-storage";
/// Mount every volume in the policy (the default).
pub const MOUNT_ALL: &str = "all";
/// Mount nothing.
pub const MOUNT_NONE: &str = "none";

/// Namespaces owned by a tool start with this prefix.
pub const TOOL_NAMESPACE_PREFIX: &str = "tool-";
/// Base directory holding every tool's home directory.
pub const TOOL_HOME_BASE: &str = "/data/project";

/// Node label steering pods onto NFS-capable workers.
pub const NFS_MOUNTED_LABEL: &str = "kubernetes.wmcloud.org/nfs-mounted";

pub const HOME_ENV: &str = "HOME";
pub const NO_HOME_ENV: &str = "NO_HOME";
pub const TOOL_DATA_DIR_ENV: &str = "TOOL_DATA_DIR";

/// The only hostPath volume a pod may already carry: the shared tool homes.
pub const PERMITTED_HOST_PATH_NAME: &str = "home";
pub const PERMITTED_HOST_PATH: &str = "/data/project";

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 9443;
/// Default health and metrics port
pub const HEALTH_PORT: u16 = 8080;

/// Errors raised while loading configuration. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read volume policy {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse volume policy {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse volume policy: {0}")]
    ParseJson(#[source] serde_json::Error),

    #[error("invalid volume policy: {0}")]
    InvalidPolicy(String),
}

/// Kubernetes hostPath type, serialized with the exact API strings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostPathType {
    /// No checks are performed before mounting.
    #[default]
    #[serde(rename = "")]
    Unset,
    DirectoryOrCreate,
    Directory,
    FileOrCreate,
    File,
    Socket,
    CharDevice,
    BlockDevice,
}

impl HostPathType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostPathType::Unset => "",
            HostPathType::DirectoryOrCreate => "DirectoryOrCreate",
            HostPathType::Directory => "Directory",
            HostPathType::FileOrCreate => "FileOrCreate",
            HostPathType::File => "File",
            HostPathType::Socket => "Socket",
            HostPathType::CharDevice => "CharDevice",
            HostPathType::BlockDevice => "BlockDevice",
        }
    }
}

impl fmt::Display for HostPathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One volume mounted into every container of a tool pod.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeDescriptor {
    pub name: String,
    pub path: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub host_path_type: Option<HostPathType>,
    #[serde(default)]
    pub read_only: bool,
}

impl VolumeDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            host_path_type: None,
            read_only: false,
        }
    }

    pub fn host_path_type(mut self, host_path_type: HostPathType) -> Self {
        self.host_path_type = Some(host_path_type);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Ordered, immutable set of volumes injected into tool pods.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumePolicy {
    volumes: Vec<VolumeDescriptor>,
}

impl VolumePolicy {
    /// Build a policy, rejecting empty or duplicate names and relative paths.
    pub fn new(volumes: Vec<VolumeDescriptor>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for volume in &volumes {
            if volume.name.is_empty() {
                return Err(ConfigError::InvalidPolicy(
                    "volume name must not be empty".to_string(),
                ));
            }
            if !seen.insert(volume.name.as_str()) {
                return Err(ConfigError::InvalidPolicy(format!(
                    "duplicate volume name {:?}",
                    volume.name
                )));
            }
            if !volume.path.starts_with('/') {
                return Err(ConfigError::InvalidPolicy(format!(
                    "volume {:?} path {:?} is not absolute",
                    volume.name, volume.path
                )));
            }
        }
        Ok(Self { volumes })
    }

    /// Load a policy from a JSON array of volume descriptors.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let volumes = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(volumes)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let volumes = serde_json::from_str(raw).map_err(ConfigError::ParseJson)?;
        Self::new(volumes)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VolumeDescriptor> {
        self.volumes.iter()
    }

    pub fn get(&self, name: &str) -> Option<&VolumeDescriptor> {
        self.volumes.iter().find(|v| v.name == name)
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

impl Default for VolumePolicy {
    fn default() -> Self {
        Self {
            volumes: vec![
                VolumeDescriptor::new("home", TOOL_HOME_BASE)
                    .host_path_type(HostPathType::Directory),
                VolumeDescriptor::new("etc-ldap", "/etc/ldap")
                    .host_path_type(HostPathType::Directory)
                    .read_only(true),
            ],
        }
    }
}

/// Process configuration read from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub webhook_port: u16,
    pub health_port: u16,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Serve plain HTTP. Only meant for local development.
    pub insecure: bool,
    pub volumes_config: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webhook_port: WEBHOOK_PORT,
            health_port: HEALTH_PORT,
            cert_path: PathBuf::from(WEBHOOK_CERT_PATH),
            key_path: PathBuf::from(WEBHOOK_KEY_PATH),
            insecure: false,
            volumes_config: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(value) = lookup("WEBHOOK_PORT") {
            config.webhook_port = parse_port("WEBHOOK_PORT", value)?;
        }
        if let Some(value) = lookup("HEALTH_PORT") {
            config.health_port = parse_port("HEALTH_PORT", value)?;
        }
        if let Some(value) = lookup("WEBHOOK_CERT_PATH") {
            config.cert_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("WEBHOOK_KEY_PATH") {
            config.key_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("WEBHOOK_INSECURE") {
            config.insecure = parse_bool("WEBHOOK_INSECURE", value)?;
        }
        config.volumes_config = lookup("VOLUMES_CONFIG")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Ok(config)
    }

    /// Load the volume policy named by `VOLUMES_CONFIG`, or the built-in one.
    pub fn volume_policy(&self) -> Result<VolumePolicy, ConfigError> {
        match &self.volumes_config {
            Some(path) => VolumePolicy::from_file(path),
            None => Ok(VolumePolicy::default()),
        }
    }
}

fn parse_port(key: &'static str, value: String) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::InvalidEnv {
        key,
        reason: e.to_string(),
        value,
    })
}

fn parse_bool(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "" | "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key,
            value,
            reason: "expected a boolean".to_string(),
        }),
    }
}
