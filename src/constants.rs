//! # Tracing Engine Constants
//!
//! Names, labels, mount paths, and timing bounds shared by the pod
//! lifecycle manager, the runtime bridges, and the session.
//!
//! ## Cross-References
//!
//! - [`crate::pod`]: Uses naming, labels, mounts, and poll timing
//! - [`crate::runtimes`]: Uses the runtime defaults
//! - [`crate::gateway`]: Uses the request timeout

use std::time::Duration;

// =============================================================================
// Privileged Pod Identity
// =============================================================================

/// Prefix for generated privileged pod names (`doktor-xxxxx`).
pub const POD_NAME_PREFIX: &str = "doktor-";

/// Ownership label key stamped on every privileged pod.
pub const OWNER_LABEL_KEY: &str = "app";

/// Ownership label value stamped on every privileged pod.
pub const OWNER_LABEL_VALUE: &str = "doktor";

/// Name of the single container inside the privileged pod.
pub const PRIVILEGED_CONTAINER_NAME: &str = "doktor-privileged";

/// Entrypoint keeping the privileged container alive until it is deleted.
pub const IDLE_COMMAND: &[&str] = &["sh", "-c", "sleep 100000000"];

// =============================================================================
// Volumes
// =============================================================================

/// Volume name for the host root filesystem.
pub const HOST_VOLUME_NAME: &str = "host";

/// Host path of the host root volume.
pub const HOST_ROOT_PATH: &str = "/";

/// Mount point of the host root inside the privileged container.
pub const HOST_MOUNT_PATH: &str = "/host";

/// Volume name for the container runtime socket.
pub const SOCKET_VOLUME_NAME: &str = "container-socket";

// =============================================================================
// Timing
// =============================================================================

/// Interval between readiness polls while waiting for the privileged pod.
pub const POD_READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default time to wait for the privileged pod to reach Running.
///
/// A zero timeout means "wait forever".
pub const DEFAULT_POD_CREATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound for a single non-streaming orchestrator API request.
pub const GATEWAY_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for copying one file into the privileged container.
///
/// Tracer binaries can be tens of megabytes over a slow API server link.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Grace period used when deleting the privileged pod.
pub const DELETE_GRACE_PERIOD_SECS: u32 = 0;

// =============================================================================
// Runtime Defaults
// =============================================================================

/// Runtimes supported out of the box.
pub const DEFAULT_SUPPORTED_RUNTIMES: &[&str] = &["docker"];

/// Image used for the bpftrace tracer container started through the runtime.
pub const DEFAULT_TRACER_IMAGE: &str = "quay.io/iovisor/bpftrace:latest";

/// Program run by the tracer when no filter expression is given.
pub const DEFAULT_TRACE_PROGRAM: &str =
    "tracepoint:syscalls:sys_enter_execve { printf(\"%d %s\\n\", pid, comm); }";
