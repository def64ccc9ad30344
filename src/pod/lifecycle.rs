//! Privileged pod lifecycle: create, wait for readiness, delete.
//!
//! ```text
//!   get_node ──▶ runtime supported? ──no──▶ UnsupportedRuntime (nothing created)
//!                      │ yes
//!                      ▼
//!                 create_pod ──▶ poll get_pod every interval
//!                                    │                │
//!                               phase Running     timeout elapsed
//!                                    ▼                ▼
//!                                PodInstance    PodCreationTimeout
//!                                               (pod left in place)
//! ```
//!
//! A timeout aborts the wait only; the create request is not retracted.
//! The timeout error names the pod so the caller can still delete it.

use crate::constants::{GATEWAY_REQUEST_TIMEOUT, POD_READY_POLL_INTERVAL};
use crate::error::{Error, Result};
use crate::gateway::{ClusterApiGateway, PodInstance, PodRef};
use crate::pod::PrivilegedPodSpec;
use crate::runtime::SupportedRuntimes;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Creates, polls, and deletes the privileged helper pod.
pub struct PrivilegedPodLifecycle {
    gateway: Arc<dyn ClusterApiGateway>,
    namespace: String,
    supported: SupportedRuntimes,
    poll_interval: Duration,
}

impl PrivilegedPodLifecycle {
    /// Creates a lifecycle manager for pods in `namespace`.
    pub fn new(
        gateway: Arc<dyn ClusterApiGateway>,
        namespace: impl Into<String>,
        supported: SupportedRuntimes,
    ) -> Self {
        Self {
            gateway,
            namespace: namespace.into(),
            supported,
            poll_interval: POD_READY_POLL_INTERVAL,
        }
    }

    /// Overrides the readiness poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Returns true if the node reports a supported container runtime.
    pub async fn is_supported_container_runtime(&self, node_name: &str) -> Result<bool> {
        match self.ensure_supported_runtime(node_name).await {
            Ok(()) => Ok(true),
            Err(Error::UnsupportedRuntime { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn ensure_supported_runtime(&self, node_name: &str) -> Result<()> {
        let node = self.gateway.get_node(node_name).await?;

        tracing::debug!(
            runtime = %node.container_runtime_version,
            node = %node_name,
            "cri"
        );

        if !self
            .supported
            .is_supported_runtime(&node.container_runtime_version)
        {
            return Err(Error::UnsupportedRuntime {
                runtime: node.container_runtime_version,
                node: Some(node_name.to_string()),
                supported: self.supported.names(),
            });
        }
        Ok(())
    }

    /// Submits the privileged pod for `node_name` without waiting for it.
    ///
    /// The returned pod exists on the cluster and is the caller's to delete.
    ///
    /// # Errors
    ///
    /// - `Error::UnsupportedRuntime` if the node's runtime is not supported
    ///   (no pod is created)
    /// - gateway errors from node lookup or pod submission
    pub async fn submit_privileged_pod(
        &self,
        node_name: &str,
        container_name: &str,
        image: &str,
        socket_path: &str,
    ) -> Result<PodRef> {
        tracing::debug!(node = %node_name, "creating privileged pod on remote node");

        self.ensure_supported_runtime(node_name).await?;

        let spec =
            PrivilegedPodSpec::new(&self.namespace, node_name, container_name, image, socket_path)?;

        let created = self
            .gateway
            .create_pod(&spec, GATEWAY_REQUEST_TIMEOUT)
            .await?;

        tracing::info!(
            pod = %created.pod.name,
            namespace = %created.pod.namespace,
            "pod created successfully"
        );
        tracing::debug!(details = ?created, "created pod details");

        Ok(created.pod)
    }

    /// Submits the privileged pod on `node_name` and waits until it runs.
    ///
    /// A zero `timeout` waits forever.
    ///
    /// # Errors
    ///
    /// Everything [`Self::submit_privileged_pod`] returns, plus
    /// `Error::PodCreationTimeout` if the pod never reached Running (the pod
    /// exists and must be deleted by the caller).
    pub async fn create_privileged_pod(
        &self,
        node_name: &str,
        container_name: &str,
        image: &str,
        socket_path: &str,
        timeout: Duration,
    ) -> Result<PodInstance> {
        let pod = self
            .submit_privileged_pod(node_name, container_name, image, socket_path)
            .await?;
        self.wait_until_running(&pod, timeout).await
    }

    /// Polls the pod at the configured interval until it is Running.
    ///
    /// Lookup failures count as "not ready yet"; only the timeout ends the
    /// wait unsuccessfully. A zero `timeout` polls forever.
    pub async fn wait_until_running(&self, pod: &PodRef, timeout: Duration) -> Result<PodInstance> {
        tracing::info!(pod = %pod, "waiting for pod successful startup");

        let start = Instant::now();
        let mut polls: u32 = 0;

        loop {
            polls += 1;
            match self.gateway.get_pod(&pod.namespace, &pod.name).await {
                Ok(instance) if instance.is_running() => {
                    tracing::debug!(pod = %pod, polls, "pod is running");
                    return Ok(instance);
                }
                Ok(instance) => {
                    tracing::debug!(pod = %pod, phase = %instance.phase, "pod not running yet");
                }
                Err(e) => {
                    tracing::debug!(pod = %pod, error = %e, "pod status lookup failed");
                }
            }

            if !timeout.is_zero() && start.elapsed() >= timeout {
                tracing::warn!(pod = %pod, polls, ?timeout, "pod did not start within timeout");
                return Err(Error::PodCreationTimeout {
                    pod: pod.name.clone(),
                    namespace: pod.namespace.clone(),
                    timeout,
                });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Deletes the privileged pod `name` with a zero grace period.
    ///
    /// A single attempt; failures are surfaced, not retried.
    pub async fn delete_privileged_pod(&self, name: &str) -> Result<()> {
        tracing::info!(pod = %name, "removing privileged pod");

        self.gateway.delete_pod(&self.namespace, name).await?;

        tracing::info!(pod = %name, "privileged pod removed");
        Ok(())
    }
}
