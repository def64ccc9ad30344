//! # doktor
//!
//! **Privileged-Pod Lifecycle and Remote Execution Engine**
//!
//! Diagnoses a running container by placing a short-lived privileged pod on
//! the node that hosts it, talking to the node's container runtime from
//! inside that pod, and tearing everything down afterwards.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              doktor                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                      TracerSession                          │    │
//! │  │         setup() → start(sink) → cleanup()   (run = all 3)   │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! │          │                     │                      │             │
//! │  ┌───────┴────────┐  ┌─────────┴────────┐  ┌──────────┴─────────┐   │
//! │  │ PrivilegedPod  │  │  RuntimeBridge   │  │ RemoteFileTransfer │   │
//! │  │   Lifecycle    │  │  (DockerBridge)  │  │  exists → upload   │   │
//! │  │ create → poll  │  │  argv builders   │  │     → verify       │   │
//! │  │   → delete     │  │  pid extraction  │  │                    │   │
//! │  └───────┬────────┘  └──────────────────┘  └──────────┬─────────┘   │
//! │          │                                            │             │
//! ├──────────┴────────────────────────────────────────────┴─────────────┤
//! │                       ClusterApiGateway                             │
//! │     get_node │ create_pod │ get_pod │ delete_pod │ execute │ upload │
//! │                     (KubectlGateway: kubectl CLI)                   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Privileged Pod
//!
//! The helper pod is pinned to the target's node, shares the host PID and
//! network namespaces, runs one privileged container idling on
//! `sleep`, and mounts:
//!
//! | Volume             | Host path          | Mount path        | Mode |
//! |--------------------|--------------------|-------------------|------|
//! | `container-socket` | runtime socket     | same as host      | ro   |
//! | `host`             | `/`                | `/host`           | rw   |
//!
//! # Guaranteed Release
//!
//! Once a privileged pod has been created, [`TracerSession::cleanup`] runs
//! exactly once on every exit path of [`TracerSession::run`], and the first
//! error is the one reported.
//!
//! # Example
//!
//! ```rust,ignore
//! use doktor::{KubectlGateway, RuntimeBridgeFactory, SessionConfig, TargetDescriptor, TracerSession};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> doktor::Result<()> {
//!     let gateway = Arc::new(KubectlGateway::new());
//!     let target = TargetDescriptor::resolve(gateway.as_ref(), "shop", "web-7d4b9", None).await?;
//!
//!     let factory = RuntimeBridgeFactory::default();
//!     let bridge = factory.create(&target.runtime_kind)?;
//!
//!     let mut session = TracerSession::new(
//!         target,
//!         SessionConfig::default(),
//!         gateway,
//!         bridge,
//!         factory.supported().clone(),
//!     );
//!     session.run(&mut tokio::io::stdout()).await
//! }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod pod;
pub mod runtime;
pub mod runtimes;
pub mod session;
pub mod target;
pub mod transfer;

// Re-exports
pub use config::{SessionConfig, UploadSpec};
pub use constants::*;
pub use error::{Error, Result};
pub use gateway::{
    ClusterApiGateway, ContainerInfo, KubectlGateway, NodeInfo, OutputSink, PodInstance, PodPhase,
    PodRef,
};
pub use pod::{PrivilegedPodLifecycle, PrivilegedPodSpec};
pub use runtime::{
    CommandKind, ProcessId, RuntimeBridge, RuntimeCommand, SupportedRuntimes, TraceRequest,
};
pub use runtimes::{DockerBridge, RuntimeBridgeFactory};
pub use session::{SessionOutcome, SessionState, TracerSession};
pub use target::{TargetDescriptor, split_container_id};
pub use transfer::{RemoteFileTransfer, TransferRequest};
