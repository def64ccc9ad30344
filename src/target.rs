//! Target resolution.
//!
//! Turns a user-supplied (namespace, pod, container?) into the resolved
//! identity a session operates against. The runtime kind and container ID
//! are derived from the pod's container status, never supplied by the user.

use crate::error::{Error, Result};
use crate::gateway::{ClusterApiGateway, PodInstance, PodRef};
use crate::runtime::ProcessId;
use serde::{Deserialize, Serialize};

/// Resolved identity of the container being diagnosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Namespace of the target pod.
    pub namespace: String,
    /// Target pod name.
    pub pod_name: String,
    /// Target container name.
    pub container_name: String,
    /// Node the target pod runs on.
    pub node_name: String,
    /// Runtime kind from the container ID scheme (e.g. `docker`).
    pub runtime_kind: String,
    /// Container ID without the scheme.
    pub container_id: String,
    /// Host pid of the target, once resolved through the runtime bridge.
    pub process_id: Option<ProcessId>,
}

impl TargetDescriptor {
    /// Resolves a target by reading the pod through the gateway.
    ///
    /// When `container` is `None`, the pod's first container is selected.
    ///
    /// # Errors
    ///
    /// - `Error::NamespaceEmpty` for an empty namespace
    /// - `Error::PodNotFound` from the gateway
    /// - `Error::NoContainers` if the pod has no containers
    /// - `Error::ContainerNotFound` if the container has no usable ID
    /// - `Error::InvalidInput` if the pod is not scheduled to a node
    pub async fn resolve(
        gateway: &dyn ClusterApiGateway,
        namespace: &str,
        pod_name: &str,
        container: Option<&str>,
    ) -> Result<Self> {
        if namespace.trim().is_empty() {
            return Err(Error::NamespaceEmpty);
        }
        if pod_name.trim().is_empty() {
            return Err(Error::InvalidInput("pod name is empty".to_string()));
        }

        let pod = gateway.get_pod(namespace, pod_name).await?;
        tracing::debug!(pod = %pod_name, phase = %pod.phase, "target pod found");

        Self::from_pod(&pod, container)
    }

    /// Resolves a target from an already fetched pod.
    pub fn from_pod(pod: &PodInstance, container: Option<&str>) -> Result<Self> {
        let PodRef { namespace, name } = &pod.pod;

        let first = pod
            .containers
            .first()
            .ok_or_else(|| Error::NoContainers(name.clone()))?;

        let container_name = match container.filter(|c| !c.is_empty()) {
            Some(c) => c.to_string(),
            None => {
                tracing::info!(
                    container = %first.name,
                    "no container specified, taking first container we found in pod"
                );
                first.name.clone()
            }
        };

        let not_found = || Error::ContainerNotFound {
            container: container_name.clone(),
            pod: name.clone(),
        };

        let qualified_id = pod
            .container(&container_name)
            .and_then(|c| c.container_id.as_deref())
            .ok_or_else(not_found)?;

        let (runtime_kind, container_id) =
            split_container_id(qualified_id).map_err(|_| not_found())?;

        let node_name = pod
            .node_name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                Error::InvalidInput(format!("pod '{name}' is not scheduled to a node"))
            })?;

        Ok(Self {
            namespace: namespace.clone(),
            pod_name: name.clone(),
            container_name,
            node_name,
            runtime_kind,
            container_id,
            process_id: None,
        })
    }
}

/// Splits `<runtime>://<id>` into its runtime kind and bare ID.
///
/// # Errors
///
/// `Error::InvalidContainerId` unless there is exactly one `://` separating
/// two non-empty parts.
pub fn split_container_id(qualified: &str) -> Result<(String, String)> {
    let invalid = |reason: &str| Error::InvalidContainerId {
        id: qualified.to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = qualified.split("://").collect();
    match parts.as_slice() {
        [runtime, id] if !runtime.is_empty() && !id.is_empty() => {
            Ok((runtime.to_string(), id.to_string()))
        }
        [_, _] => Err(invalid("empty runtime or id")),
        _ => Err(invalid("expected <runtime>://<id>")),
    }
}
