//! `kubectl`-backed gateway.
//!
//! Every verb shells out to the `kubectl` binary with `-o json` where an
//! object comes back. Non-streaming calls are bounded by the request
//! timeout, `cp` by the longer upload timeout; `exec` streams until the
//! remote command exits.
//!
//! ## Exit Codes
//!
//! `kubectl exec` exits with the remote command's code and prints
//! `command terminated with exit code N`. Any other non-zero exit is a
//! transport failure (pod gone, API unreachable, ...).

use super::{
    ClusterApiGateway, ContainerInfo, NodeInfo, OutputSink, PodInstance, PodPhase, PodRef,
};
use crate::constants::{DELETE_GRACE_PERIOD_SECS, GATEWAY_REQUEST_TIMEOUT, UPLOAD_TIMEOUT};
use crate::error::{Error, Result};
use crate::pod::PrivilegedPodSpec;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;

/// Marker kubectl prints when the remote command itself exited non-zero.
const REMOTE_EXIT_MARKER: &str = "command terminated with exit code";

/// Marker in kubectl's stderr for a missing object.
const NOT_FOUND_MARKER: &str = "NotFound";

/// Gateway that drives the cluster through the `kubectl` CLI.
#[derive(Debug, Clone)]
pub struct KubectlGateway {
    kubectl: PathBuf,
    context: Option<String>,
    request_timeout: Duration,
}

impl Default for KubectlGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl KubectlGateway {
    /// Creates a gateway using `kubectl` from `PATH` and the current context.
    pub fn new() -> Self {
        Self {
            kubectl: PathBuf::from("kubectl"),
            context: None,
            request_timeout: GATEWAY_REQUEST_TIMEOUT,
        }
    }

    /// Uses a specific kubectl binary.
    #[must_use]
    pub fn with_binary(mut self, kubectl: impl Into<PathBuf>) -> Self {
        self.kubectl = kubectl.into();
        self
    }

    /// Pins every call to a kubeconfig context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Overrides the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    // =========================================================================
    // Kubeconfig
    // =========================================================================

    /// Picks the requested context, or the current one when `None`.
    ///
    /// # Errors
    ///
    /// `Error::ContextNotFound` if the requested context is not configured.
    pub async fn resolve_context(&self, requested: Option<&str>) -> Result<String> {
        match requested.filter(|c| !c.is_empty()) {
            Some(requested) => {
                let output = self
                    .run(
                        "get contexts",
                        "kubeconfig",
                        &["config", "get-contexts", "-o", "name"],
                        None,
                        self.request_timeout,
                    )
                    .await?;
                let output = check_output(output, "get contexts", "kubeconfig")?;
                let stdout = String::from_utf8_lossy(&output.stdout);

                if stdout.lines().any(|line| line.trim() == requested) {
                    Ok(requested.to_string())
                } else {
                    Err(Error::ContextNotFound(requested.to_string()))
                }
            }
            None => {
                let output = self
                    .run(
                        "current context",
                        "kubeconfig",
                        &["config", "current-context"],
                        None,
                        self.request_timeout,
                    )
                    .await?;
                let output = check_output(output, "current context", "kubeconfig")?;
                let context = String::from_utf8_lossy(&output.stdout).trim().to_string();

                if context.is_empty() {
                    return Err(Error::ContextNotFound("<current>".to_string()));
                }
                Ok(context)
            }
        }
    }

    /// Namespace configured for the gateway's context.
    ///
    /// # Errors
    ///
    /// `Error::NamespaceEmpty` if the context has no namespace set.
    pub async fn current_namespace(&self) -> Result<String> {
        let output = self
            .run(
                "current namespace",
                "kubeconfig",
                &["config", "view", "--minify", "-o", "jsonpath={..namespace}"],
                None,
                self.request_timeout,
            )
            .await?;
        let output = check_output(output, "current namespace", "kubeconfig")?;
        let namespace = String::from_utf8_lossy(&output.stdout).trim().to_string();

        if namespace.is_empty() {
            return Err(Error::NamespaceEmpty);
        }
        Ok(namespace)
    }

    // =========================================================================
    // Process Helpers
    // =========================================================================

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.kubectl);
        if let Some(context) = &self.context {
            cmd.arg("--context").arg(context);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    /// Runs kubectl to completion, optionally feeding `stdin`.
    async fn run(
        &self,
        operation: &str,
        target: &str,
        args: &[&str],
        stdin: Option<&[u8]>,
        timeout_dur: Duration,
    ) -> Result<Output> {
        tracing::debug!(
            operation = %operation,
            target = %target,
            "kubectl {}",
            args.join(" ")
        );

        let mut cmd = self.command();
        cmd.args(args);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let call = async {
            let mut child = cmd.spawn()?;
            if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(input).await?;
                pipe.shutdown().await?;
            }
            child.wait_with_output().await
        };

        timeout(timeout_dur, call)
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("{operation} {target}"),
                duration: timeout_dur,
            })?
            .map_err(|e| Error::gateway(operation, target, e))
    }
}

/// Fails on a non-zero kubectl exit, carrying its stderr.
fn check_output(output: Output, operation: &str, target: &str) -> Result<Output> {
    if output.status.success() {
        return Ok(output);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(Error::gateway(operation, target, stderr.trim()))
}

fn is_not_found(stderr: &[u8]) -> bool {
    String::from_utf8_lossy(stderr).contains(NOT_FOUND_MARKER)
}

/// Classifies a finished `kubectl exec`.
///
/// `Ok(code)` when the remote command ran; `Err` when kubectl itself failed.
fn classify_exec_exit(
    code: Option<i32>,
    stderr: &str,
    pod: &PodRef,
) -> Result<i32> {
    match code {
        Some(0) => Ok(0),
        Some(code) if stderr.contains(REMOTE_EXIT_MARKER) => Ok(code),
        _ if stderr.contains(NOT_FOUND_MARKER) => Err(Error::PodNotFound {
            namespace: pod.namespace.clone(),
            name: pod.name.clone(),
        }),
        Some(code) => Err(Error::gateway(
            "exec",
            pod.to_string(),
            format!("kubectl exited with {code}: {}", stderr.trim()),
        )),
        None => Err(Error::gateway("exec", pod.to_string(), "kubectl terminated by signal")),
    }
}

#[async_trait]
impl ClusterApiGateway for KubectlGateway {
    async fn get_node(&self, name: &str) -> Result<NodeInfo> {
        let output = self
            .run(
                "get node",
                name,
                &["get", "node", name, "-o", "json"],
                None,
                self.request_timeout,
            )
            .await?;

        if !output.status.success() && is_not_found(&output.stderr) {
            return Err(Error::NodeNotFound(name.to_string()));
        }
        let output = check_output(output, "get node", name)?;
        parse_node(&output.stdout)
    }

    async fn create_pod(&self, spec: &PrivilegedPodSpec, timeout: Duration) -> Result<PodInstance> {
        let manifest = serde_json::to_vec(&spec.to_manifest())?;
        let target = format!("{}/{}", spec.namespace, spec.generate_name);

        let output = self
            .run(
                "create pod",
                &target,
                &["create", "-n", spec.namespace.as_str(), "-f", "-", "-o", "json"],
                Some(&manifest),
                timeout,
            )
            .await?;
        let output = check_output(output, "create pod", &target)?;
        parse_pod(&output.stdout)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodInstance> {
        let target = format!("{namespace}/{name}");
        let output = self
            .run(
                "get pod",
                &target,
                &["get", "pod", "-n", namespace, name, "-o", "json"],
                None,
                self.request_timeout,
            )
            .await?;

        if !output.status.success() && is_not_found(&output.stderr) {
            return Err(Error::PodNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        let output = check_output(output, "get pod", &target)?;
        parse_pod(&output.stdout)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let target = format!("{namespace}/{name}");
        let grace_period = format!("--grace-period={DELETE_GRACE_PERIOD_SECS}");

        let output = self
            .run(
                "delete pod",
                &target,
                &[
                    "delete",
                    "pod",
                    "-n",
                    namespace,
                    name,
                    grace_period.as_str(),
                    "--force",
                    "--wait=false",
                ],
                None,
                self.request_timeout,
            )
            .await?;

        if !output.status.success() && is_not_found(&output.stderr) {
            return Err(Error::PodNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        check_output(output, "delete pod", &target)?;
        Ok(())
    }

    async fn execute(
        &self,
        pod: &PodRef,
        container: &str,
        command: &[String],
        stdout: &mut OutputSink<'_>,
    ) -> Result<i32> {
        tracing::debug!(pod = %pod, container = %container, "kubectl exec {}", command.join(" "));

        let mut cmd = self.command();
        cmd.args([
            "exec",
            "-n",
            pod.namespace.as_str(),
            pod.name.as_str(),
            "-c",
            container,
            "--",
        ]);
        cmd.args(command);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::gateway("exec", pod.to_string(), e))?;

        let (Some(mut child_stdout), Some(mut child_stderr)) =
            (child.stdout.take(), child.stderr.take())
        else {
            return Err(Error::gateway("exec", pod.to_string(), "missing output pipes"));
        };

        let mut stderr_buf = Vec::new();
        let (copied, drained) = tokio::join!(
            tokio::io::copy(&mut child_stdout, stdout),
            child_stderr.read_to_end(&mut stderr_buf),
        );
        copied.map_err(|e| Error::gateway("exec", pod.to_string(), e))?;
        drained.map_err(|e| Error::gateway("exec", pod.to_string(), e))?;

        let status = child
            .wait()
            .await
            .map_err(|e| Error::gateway("exec", pod.to_string(), e))?;

        let stderr = String::from_utf8_lossy(&stderr_buf);
        if !stderr.trim().is_empty() {
            tracing::debug!(pod = %pod, stderr = %stderr.trim(), "exec stderr");
        }

        classify_exec_exit(status.code(), &stderr, pod)
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        remote_path: &str,
        pod: &PodRef,
        container: &str,
    ) -> Result<i32> {
        let local = local_path.to_string_lossy();
        let destination = format!("{}/{}:{}", pod.namespace, pod.name, remote_path);

        let output = self
            .run(
                "upload",
                &destination,
                &["cp", local.as_ref(), destination.as_str(), "-c", container],
                None,
                UPLOAD_TIMEOUT.max(self.request_timeout),
            )
            .await?;

        if output.status.success() {
            return Ok(0);
        }

        if is_not_found(&output.stderr) {
            return Err(Error::PodNotFound {
                namespace: pod.namespace.clone(),
                name: pod.name.clone(),
            });
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::warn!(destination = %destination, stderr = %stderr.trim(), "kubectl cp failed");

        output
            .status
            .code()
            .ok_or_else(|| Error::gateway("upload", destination, "kubectl terminated by signal"))
    }
}

// =============================================================================
// JSON Decoding
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct NodeObject {
    metadata: ObjectMeta,
    #[serde(default)]
    status: NodeStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeStatus {
    #[serde(default)]
    node_info: NodeSystemInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeSystemInfo {
    #[serde(default)]
    container_runtime_version: String,
}

#[derive(Debug, Deserialize)]
struct PodObject {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: PodObjectSpec,
    #[serde(default)]
    status: PodObjectStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodObjectSpec {
    #[serde(default)]
    node_name: Option<String>,
    #[serde(default)]
    containers: Vec<NamedObject>,
}

#[derive(Debug, Deserialize)]
struct NamedObject {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodObjectStatus {
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Deserialize)]
struct ContainerStatus {
    name: String,
    #[serde(rename = "containerID", default)]
    container_id: Option<String>,
}

/// Decodes a `kubectl get node -o json` document.
pub fn parse_node(json: &[u8]) -> Result<NodeInfo> {
    let node: NodeObject = serde_json::from_slice(json)?;
    Ok(NodeInfo {
        name: node.metadata.name,
        container_runtime_version: node.status.node_info.container_runtime_version,
    })
}

/// Decodes a `kubectl get pod -o json` document.
///
/// Containers follow spec order; IDs are joined in from the statuses.
pub fn parse_pod(json: &[u8]) -> Result<PodInstance> {
    let pod: PodObject = serde_json::from_slice(json)?;

    let status_id = |name: &str| {
        pod.status
            .container_statuses
            .iter()
            .find(|s| s.name == name)
            .and_then(|s| s.container_id.clone())
            .filter(|id| !id.is_empty())
    };

    let containers = if pod.spec.containers.is_empty() {
        pod.status
            .container_statuses
            .iter()
            .map(|s| ContainerInfo {
                name: s.name.clone(),
                container_id: s.container_id.clone().filter(|id| !id.is_empty()),
            })
            .collect()
    } else {
        pod.spec
            .containers
            .iter()
            .map(|c| ContainerInfo {
                name: c.name.clone(),
                container_id: status_id(&c.name),
            })
            .collect()
    };

    let phase = pod
        .status
        .phase
        .as_deref()
        .map(PodPhase::parse)
        .unwrap_or_default();

    Ok(PodInstance {
        pod: PodRef::new(pod.metadata.namespace.clone(), pod.metadata.name.clone()),
        node_name: pod.spec.node_name.clone().filter(|n| !n.is_empty()),
        phase,
        containers,
        created_at: pod.metadata.creation_timestamp,
    })
}
