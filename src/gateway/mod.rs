//! # Cluster API Gateway
//!
//! Thin contract over the orchestrator API used by everything above it:
//! node lookup, pod create/get/delete, command execution inside a
//! container, and file upload.
//!
//! ## Contract
//!
//! ```text
//! get_node(name)                        → NodeInfo | NodeNotFound
//! create_pod(spec, timeout)             → PodInstance
//! get_pod(namespace, name)              → PodInstance | PodNotFound
//! delete_pod(namespace, name)           → ()            (grace period 0)
//! execute(pod, container, argv, stdout) → exit code
//! upload_file(local, remote, pod, ctr)  → exit code
//! ```
//!
//! Every call is awaited to completion by the caller before the next one is
//! issued. Implementations never retry; retry policy belongs to the caller
//! (see the readiness loop in [`crate::pod::PrivilegedPodLifecycle`]).
//!
//! `execute` and `upload_file` distinguish two failure modes: `Err(_)` means
//! the transport failed and the command's outcome is unknown, `Ok(code)`
//! means the command ran and exited with `code`.

pub mod kubectl;

pub use kubectl::KubectlGateway;

use crate::error::Result;
use crate::pod::PrivilegedPodSpec;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWrite;

// =============================================================================
// Gateway Types
// =============================================================================

/// Output sink for streamed command output.
pub type OutputSink<'a> = dyn AsyncWrite + Send + Unpin + 'a;

/// Identity of a pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodRef {
    /// Namespace the pod lives in.
    pub namespace: String,
    /// Pod name.
    pub name: String,
}

impl PodRef {
    /// Creates a pod reference.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for PodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Node information relevant to privileged pod placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node name.
    pub name: String,
    /// Reported container runtime version, e.g. `docker://20.10.7`.
    pub container_runtime_version: String,
}

/// Observed pod lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PodPhase {
    /// Accepted but not all containers are running.
    #[default]
    Pending,
    /// Bound to a node and at least one container is running.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// At least one container terminated with failure.
    Failed,
    /// Phase could not be determined.
    Unknown,
}

impl PodPhase {
    /// Parses the orchestrator's phase string.
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodPhase::Pending => write!(f, "Pending"),
            PodPhase::Running => write!(f, "Running"),
            PodPhase::Succeeded => write!(f, "Succeeded"),
            PodPhase::Failed => write!(f, "Failed"),
            PodPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A container of an observed pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Container name within the pod.
    pub name: String,
    /// Runtime-qualified container ID (`docker://abc...`), once started.
    pub container_id: Option<String>,
}

/// Observed state of a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInstance {
    /// Pod identity.
    pub pod: PodRef,
    /// Node the pod is scheduled on.
    pub node_name: Option<String>,
    /// Current phase.
    pub phase: PodPhase,
    /// Containers in spec order, with IDs from the container statuses.
    pub containers: Vec<ContainerInfo>,
    /// Server-side creation time.
    pub created_at: Option<DateTime<Utc>>,
}

impl PodInstance {
    /// Returns true if the pod is in the Running phase.
    pub fn is_running(&self) -> bool {
        self.phase == PodPhase::Running
    }

    /// Looks up a container by name.
    pub fn container(&self, name: &str) -> Option<&ContainerInfo> {
        self.containers.iter().find(|c| c.name == name)
    }
}

// =============================================================================
// Gateway Trait
// =============================================================================

/// Orchestrator API verbs consumed by the tracing engine.
///
/// # Implementations
///
/// - `KubectlGateway`: delegates to the `kubectl` binary
#[async_trait]
pub trait ClusterApiGateway: Send + Sync {
    /// Looks up a node.
    ///
    /// # Errors
    ///
    /// `Error::NodeNotFound` if the node does not exist.
    async fn get_node(&self, name: &str) -> Result<NodeInfo>;

    /// Submits a pod, returning the server's view of it (with its generated
    /// name). `timeout` bounds the API request, not pod readiness.
    async fn create_pod(&self, spec: &PrivilegedPodSpec, timeout: Duration) -> Result<PodInstance>;

    /// Reads a pod.
    ///
    /// # Errors
    ///
    /// `Error::PodNotFound` if the pod does not exist.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodInstance>;

    /// Deletes a pod immediately (zero grace period, no graceful drain).
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    /// Runs `command` in `container`, streaming stdout into `stdout`.
    ///
    /// Returns the command's exit code.
    async fn execute(
        &self,
        pod: &PodRef,
        container: &str,
        command: &[String],
        stdout: &mut OutputSink<'_>,
    ) -> Result<i32>;

    /// Copies `local_path` to `remote_path` inside `container`.
    ///
    /// Returns the transfer's exit code.
    async fn upload_file(
        &self,
        local_path: &Path,
        remote_path: &str,
        pod: &PodRef,
        container: &str,
    ) -> Result<i32>;
}
