//! Privileged pod specification.
//!
//! Declarative description of the helper pod and its rendering into a
//! Kubernetes `v1/Pod` manifest.
//!
//! # Manifest Shape
//!
//! ```yaml
//! apiVersion: v1
//! kind: Pod
//! metadata:
//!   generateName: doktor-
//!   namespace: <target namespace>
//!   labels: { app: doktor }
//! spec:
//!   nodeName: <target node>
//!   hostPID: true
//!   hostNetwork: true
//!   restartPolicy: Never
//!   containers:
//!   - name: doktor-privileged
//!     image: <image>
//!     command: [sh, -c, sleep 100000000]
//!     securityContext: { privileged: true }
//!     volumeMounts:
//!     - { name: container-socket, mountPath: <socket>, readOnly: true }
//!     - { name: host, mountPath: /host, readOnly: false }
//!   volumes:
//!   - { name: host, hostPath: { path: /, type: Directory } }
//!   - { name: container-socket, hostPath: { path: <socket>, type: Socket } }
//! ```

use crate::constants::{
    HOST_MOUNT_PATH, HOST_ROOT_PATH, HOST_VOLUME_NAME, IDLE_COMMAND, OWNER_LABEL_KEY,
    OWNER_LABEL_VALUE, POD_NAME_PREFIX, SOCKET_VOLUME_NAME,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;

/// Maximum length for Kubernetes-compatible names (RFC 1123 DNS subdomain).
pub const MAX_NAME_LEN: usize = 253;

/// Maximum length for namespace names.
pub const MAX_NAMESPACE_LEN: usize = 63;

/// Maximum length for container names within a pod.
pub const MAX_CONTAINER_NAME_LEN: usize = 63;

// =============================================================================
// Validation Helpers
// =============================================================================

/// Validates a Kubernetes-compatible name (RFC 1123 subdomain).
fn validate_name(kind: &str, name: &str, max_len: usize) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput(format!("{kind} cannot be empty")));
    }

    if name.len() > max_len {
        return Err(Error::InvalidInput(format!(
            "{kind} '{name}' exceeds maximum length of {max_len}"
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(Error::InvalidInput(format!(
            "{kind} '{name}' must contain only lowercase alphanumeric characters, '-' or '.'"
        )));
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(Error::InvalidInput(format!(
            "{kind} '{name}' cannot start or end with '-'"
        )));
    }

    Ok(())
}

/// Validates an RFC 1123 label (namespaces, container names): no dots, and
/// alphanumeric at both ends.
fn validate_label(kind: &str, name: &str, max_len: usize) -> Result<()> {
    validate_name(kind, name, max_len)?;

    if name.contains('.') {
        return Err(Error::InvalidInput(format!(
            "{kind} '{name}' must be a DNS label and cannot contain '.'"
        )));
    }

    let alphanumeric = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !alphanumeric(name.chars().next()) || !alphanumeric(name.chars().last()) {
        return Err(Error::InvalidInput(format!(
            "{kind} '{name}' must start and end with an alphanumeric character"
        )));
    }

    Ok(())
}

/// Validates a host path used for a hostPath volume.
fn validate_host_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(Error::InvalidInput(format!(
            "host path must be absolute: {path}"
        )));
    }

    if path.split('/').any(|segment| segment == "..") {
        return Err(Error::InvalidInput(format!(
            "host path contains path traversal: {path}"
        )));
    }

    Ok(())
}

// =============================================================================
// Volumes
// =============================================================================

/// Kind of host path a volume points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostPathType {
    /// A UNIX socket file.
    Socket,
    /// A directory.
    Directory,
}

impl HostPathType {
    /// Infers the host path type for a runtime socket path.
    ///
    /// Paths whose last component ends in `.sock` are sockets; anything else
    /// (for example `/run/containerd`) is mounted as a directory.
    pub fn for_socket_path(path: &str) -> Self {
        let is_socket = Path::new(path)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sock"));
        if is_socket {
            Self::Socket
        } else {
            Self::Directory
        }
    }

    /// Returns the Kubernetes `hostPath.type` string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Socket => "Socket",
            Self::Directory => "Directory",
        }
    }
}

/// Volume mount inside the privileged container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Name of the volume to mount.
    pub name: String,
    /// Path inside the container to mount at.
    pub mount_path: String,
    /// If true, mount as read-only.
    pub read_only: bool,
}

/// Host path volume of the privileged pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPathVolume {
    /// Volume name (referenced by volume mounts).
    pub name: String,
    /// Path on the node.
    pub path: String,
    /// What the path is expected to be.
    pub path_type: HostPathType,
}

// =============================================================================
// Privileged Pod Specification
// =============================================================================

/// Specification of the node-pinned privileged helper pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegedPodSpec {
    /// Prefix for the server-generated pod name.
    pub generate_name: String,
    /// Namespace the pod is created in.
    pub namespace: String,
    /// Ownership labels.
    pub labels: BTreeMap<String, String>,
    /// Exact node the pod is pinned to.
    pub node_name: String,
    /// Share the host's pid namespace.
    pub host_pid: bool,
    /// Share the host's network namespace.
    pub host_network: bool,
    /// Always `Never`: the helper is never restarted.
    pub restart_policy: String,
    /// Name of the single privileged container.
    pub container_name: String,
    /// Image of the privileged container.
    pub image: String,
    /// Idle entrypoint.
    pub command: Vec<String>,
    /// Container runs privileged.
    pub privileged: bool,
    /// Mounts (runtime socket read-only, host root read-write).
    pub volume_mounts: Vec<VolumeMount>,
    /// Host path volumes backing the mounts.
    pub volumes: Vec<HostPathVolume>,
}

impl PrivilegedPodSpec {
    /// Builds the privileged pod spec for a node.
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` for empty or malformed names, an empty image, or
    /// a relative / traversing socket path.
    pub fn new(
        namespace: &str,
        node_name: &str,
        container_name: &str,
        image: &str,
        socket_path: &str,
    ) -> Result<Self> {
        validate_label("namespace", namespace, MAX_NAMESPACE_LEN)?;
        validate_name("node name", node_name, MAX_NAME_LEN)?;
        validate_label("container name", container_name, MAX_CONTAINER_NAME_LEN)?;
        validate_host_path(socket_path)?;

        if image.trim().is_empty() {
            return Err(Error::InvalidInput("image cannot be empty".to_string()));
        }

        let mut labels = BTreeMap::new();
        labels.insert(OWNER_LABEL_KEY.to_string(), OWNER_LABEL_VALUE.to_string());

        Ok(Self {
            generate_name: POD_NAME_PREFIX.to_string(),
            namespace: namespace.to_string(),
            labels,
            node_name: node_name.to_string(),
            host_pid: true,
            host_network: true,
            restart_policy: "Never".to_string(),
            container_name: container_name.to_string(),
            image: image.to_string(),
            command: IDLE_COMMAND.iter().map(|s| s.to_string()).collect(),
            privileged: true,
            volume_mounts: vec![
                VolumeMount {
                    name: SOCKET_VOLUME_NAME.to_string(),
                    mount_path: socket_path.to_string(),
                    read_only: true,
                },
                VolumeMount {
                    name: HOST_VOLUME_NAME.to_string(),
                    mount_path: HOST_MOUNT_PATH.to_string(),
                    read_only: false,
                },
            ],
            volumes: vec![
                HostPathVolume {
                    name: HOST_VOLUME_NAME.to_string(),
                    path: HOST_ROOT_PATH.to_string(),
                    path_type: HostPathType::Directory,
                },
                HostPathVolume {
                    name: SOCKET_VOLUME_NAME.to_string(),
                    path: socket_path.to_string(),
                    path_type: HostPathType::for_socket_path(socket_path),
                },
            ],
        })
    }

    /// Renders the spec as a `v1/Pod` manifest.
    pub fn to_manifest(&self) -> Value {
        let mounts: Vec<Value> = self
            .volume_mounts
            .iter()
            .map(|m| {
                json!({
                    "name": m.name,
                    "mountPath": m.mount_path,
                    "readOnly": m.read_only,
                })
            })
            .collect();

        let volumes: Vec<Value> = self
            .volumes
            .iter()
            .map(|v| {
                json!({
                    "name": v.name,
                    "hostPath": {
                        "path": v.path,
                        "type": v.path_type.as_str(),
                    },
                })
            })
            .collect();

        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "generateName": self.generate_name,
                "namespace": self.namespace,
                "labels": self.labels,
            },
            "spec": {
                "nodeName": self.node_name,
                "restartPolicy": self.restart_policy,
                "hostPID": self.host_pid,
                "hostNetwork": self.host_network,
                "containers": [{
                    "name": self.container_name,
                    "image": self.image,
                    "stdin": true,
                    "command": self.command,
                    "securityContext": { "privileged": self.privileged },
                    "volumeMounts": mounts,
                }],
                "volumes": volumes,
            },
        })
    }
}
