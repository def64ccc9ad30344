//! # Privileged Pod
//!
//! The helper workload the tracing engine runs diagnostics from: one
//! privileged container, pinned to the target's node, sharing the host's
//! pid and network namespaces, with the host root and the container runtime
//! socket mounted in.
//!
//! ## Ownership
//!
//! Exactly one privileged pod exists per active session. It is created at
//! `Setup` and always targeted for deletion at `Cleanup`.
//!
//! ```text
//!   (none) ──create──▶ Pending ──poll──▶ Running ──delete──▶ (gone)
//!                         │
//!                         └── timeout: left behind, caller deletes
//! ```

mod lifecycle;
mod spec;

pub use lifecycle::PrivilegedPodLifecycle;
pub use spec::{
    HostPathType, HostPathVolume, MAX_CONTAINER_NAME_LEN, MAX_NAME_LEN, MAX_NAMESPACE_LEN,
    PrivilegedPodSpec, VolumeMount,
};
