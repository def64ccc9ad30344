//! Error types for the privileged tracing engine.

use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for tracing engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while setting up, running, or tearing down a session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// Container runtime is not in the supported set.
    ///
    /// Raised by the bridge factory (`node` is `None`) and by the pod
    /// lifecycle manager when a node reports an unsupported runtime.
    #[error("{}", unsupported_runtime_message(.runtime, .node, .supported))]
    UnsupportedRuntime {
        runtime: String,
        node: Option<String>,
        supported: Vec<String>,
    },

    /// Runtime inspection output could not be parsed into a process id.
    #[error("failed to extract process id from '{output}': {reason}")]
    ProcessIdParse { output: String, reason: String },

    // =========================================================================
    // Target Resolution Errors
    // =========================================================================
    /// Requested kubeconfig context does not exist.
    #[error("context doesn't exist: {0}")]
    ContextNotFound(String),

    /// No namespace was given and none is configured for the context.
    #[error("namespace value is empty, should be custom or default")]
    NamespaceEmpty,

    /// Pod not found in namespace.
    #[error("pod not found: {namespace}/{name}")]
    PodNotFound { namespace: String, name: String },

    /// Node not found.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// Pod has no containers at all.
    #[error("no containers in pod '{0}'")]
    NoContainers(String),

    /// Container not found in pod status.
    #[error("couldn't find container '{container}' in pod '{pod}'")]
    ContainerNotFound { container: String, pod: String },

    /// Container ID is not in `<runtime>://<id>` form.
    #[error("invalid container ID '{id}': {reason}")]
    InvalidContainerId { id: String, reason: String },

    // =========================================================================
    // Pod Lifecycle Errors
    // =========================================================================
    /// Privileged pod never reached the Running phase.
    ///
    /// The pod was created and is left in place; the caller is expected to
    /// delete it.
    #[error("failed to create pod within timeout ({timeout:?}): {namespace}/{pod}")]
    PodCreationTimeout {
        pod: String,
        namespace: String,
        timeout: Duration,
    },

    // =========================================================================
    // Execution Errors
    // =========================================================================
    /// Command ran but exited non-zero.
    #[error("command '{command}' failed with exit code {exit_code}")]
    ExecutionFailure { command: String, exit_code: i32 },

    // =========================================================================
    // Transfer Errors
    // =========================================================================
    /// File upload call failed or returned a non-zero exit code.
    #[error("upload to '{remote}' failed (exit code {exit_code:?}): {reason}")]
    UploadFailed {
        remote: String,
        exit_code: Option<i32>,
        reason: String,
    },

    /// Upload reported success but the file is not present on the target.
    #[error("couldn't locate file '{remote}' on pod after upload done")]
    UploadVerificationFailed { remote: String },

    /// Local file to upload does not exist.
    #[error("local file not found: {0}")]
    LocalFileNotFound(PathBuf),

    // =========================================================================
    // Cleanup Errors
    // =========================================================================
    /// A teardown step failed; manual removal may be required.
    #[error("failed to clean up pod '{pod}', manual removal required: {reason}")]
    CleanupFailure { pod: String, reason: String },

    // =========================================================================
    // Gateway Errors
    // =========================================================================
    /// Orchestrator API call failed.
    #[error("{operation} failed for '{target}': {reason}")]
    Gateway {
        operation: String,
        target: String,
        reason: String,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// Session is in wrong state for operation.
    #[error("session is in state '{state}', expected '{expected}'")]
    InvalidState { state: String, expected: String },

    /// Invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Builds a gateway error with operation and target context attached.
    pub fn gateway(
        operation: impl Into<String>,
        target: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::Gateway {
            operation: operation.into(),
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for errors that mean "the object does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PodNotFound { .. } | Self::NodeNotFound(_))
    }
}

fn unsupported_runtime_message(
    runtime: &str,
    node: &Option<String>,
    supported: &[String],
) -> String {
    match node {
        Some(node) => format!(
            "container runtime '{runtime}' on node {node} isn't supported, supported container runtimes are: {supported:?}"
        ),
        None => format!(
            "unable to build bridge to '{runtime}', supported container runtimes are: {supported:?}"
        ),
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
