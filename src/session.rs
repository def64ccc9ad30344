//! # Tracer Session
//!
//! One Setup → Start → Cleanup lifecycle bound to one target and one
//! privileged pod.
//!
//! ## State Machine
//!
//! ```text
//!   ┌──────┐ setup() ┌────────────┐  pod running  ┌───────┐ start() ┌─────────┐
//!   │ Idle │ ──────▶ │ SettingUp  │ ────────────▶ │ Ready │ ──────▶ │ Running │
//!   └──────┘         └─────┬──────┘               └───┬───┘         └────┬────┘
//!                          │ failed, pod exists       │ cleanup()        │ cleanup()
//!                          └──────────────────────────┼──────────────────┘
//!                                                     ▼
//!                                              ┌────────────┐
//!                                              │ CleaningUp │
//!                                              └─────┬──────┘
//!                                                    ▼
//!                                        Terminated(success | failure)
//! ```
//!
//! ## Guaranteed Release
//!
//! Once a privileged pod exists, `cleanup()` must run exactly once on every
//! exit path. [`TracerSession::run`] does this for the caller: Start failing
//! never prevents Cleanup, and a Cleanup failure never masks the Setup or
//! Start error that came first.
//!
//! Cleanup runs the bridge's cleanup command (failure is only a warning)
//! and then deletes the pod (failure is returned).

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::gateway::{ClusterApiGateway, OutputSink, PodRef};
use crate::pod::PrivilegedPodLifecycle;
use crate::runtime::{RuntimeBridge, RuntimeCommand, SupportedRuntimes, TraceRequest};
use crate::target::TargetDescriptor;
use crate::transfer::{RemoteFileTransfer, TransferRequest};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

// =============================================================================
// Session State
// =============================================================================

/// How a terminated session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Start (or the self-test) and Cleanup both succeeded.
    Success,
    /// Something failed; carries the first error's message.
    Failure(String),
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing done yet.
    Idle,
    /// Setup in progress, or Setup failed after the pod was created.
    SettingUp,
    /// Privileged pod running, ready to trace.
    Ready,
    /// Trace started (and possibly finished).
    Running,
    /// Teardown in progress.
    CleaningUp,
    /// Session is over.
    Terminated(SessionOutcome),
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::SettingUp => write!(f, "setting-up"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::CleaningUp => write!(f, "cleaning-up"),
            Self::Terminated(SessionOutcome::Success) => write!(f, "terminated(success)"),
            Self::Terminated(SessionOutcome::Failure(_)) => write!(f, "terminated(failure)"),
        }
    }
}

/// What a scoped run executes between Setup and Cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionAction {
    Trace,
    SelfTest,
}

// =============================================================================
// Tracer Session
// =============================================================================

/// Privileged-pod tracing session for one target.
pub struct TracerSession {
    target: TargetDescriptor,
    config: SessionConfig,
    gateway: Arc<dyn ClusterApiGateway>,
    bridge: Box<dyn RuntimeBridge>,
    lifecycle: PrivilegedPodLifecycle,
    transfer: RemoteFileTransfer,
    state: SessionState,
    /// Privileged pod, once created (even if it never became ready).
    privileged_pod: Option<PodRef>,
    /// True once the privileged container reached Running.
    pod_ready: bool,
    /// Socket path resolved at Setup.
    socket_path: String,
    first_error: Option<String>,
    /// True once Start or the self-test succeeded.
    completed: bool,
    cleaned_up: bool,
}

impl TracerSession {
    /// Creates an idle session.
    ///
    /// Privileged pods are created in the target's namespace.
    pub fn new(
        target: TargetDescriptor,
        config: SessionConfig,
        gateway: Arc<dyn ClusterApiGateway>,
        bridge: Box<dyn RuntimeBridge>,
        supported: SupportedRuntimes,
    ) -> Self {
        let lifecycle =
            PrivilegedPodLifecycle::new(Arc::clone(&gateway), target.namespace.clone(), supported)
                .with_poll_interval(config.poll_interval);
        let transfer = RemoteFileTransfer::new(Arc::clone(&gateway));

        Self {
            target,
            config,
            gateway,
            bridge,
            lifecycle,
            transfer,
            state: SessionState::Idle,
            privileged_pod: None,
            pod_ready: false,
            socket_path: String::new(),
            first_error: None,
            completed: false,
            cleaned_up: false,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Returns the target, including the process id once Setup resolved it.
    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    /// Returns the privileged pod, if one was created.
    pub fn privileged_pod(&self) -> Option<&PodRef> {
        self.privileged_pod.as_ref()
    }

    /// True if a privileged pod exists and Cleanup has not run yet.
    pub fn needs_cleanup(&self) -> bool {
        self.privileged_pod.is_some() && !self.cleaned_up
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Creates the privileged pod and prepares it for tracing.
    ///
    /// If this fails after the pod was created ([`Self::needs_cleanup`]
    /// returns true), the caller must still call [`Self::cleanup`].
    pub async fn setup(&mut self) -> Result<()> {
        self.expect_state(&SessionState::Idle, "idle")?;
        self.state = SessionState::SettingUp;

        if let Err(e) = self.config.validate() {
            return Err(self.fail(e));
        }

        let image = self
            .config
            .image
            .clone()
            .unwrap_or_else(|| self.bridge.default_image().to_string());
        self.socket_path = self
            .config
            .socket_path
            .clone()
            .unwrap_or_else(|| self.bridge.default_socket_path().to_string());

        tracing::info!(
            node = %self.target.node_name,
            image = %image,
            socket = %self.socket_path,
            "creating privileged pod on node"
        );

        let submitted = self
            .lifecycle
            .submit_privileged_pod(
                &self.target.node_name,
                &self.config.privileged_container_name,
                &image,
                &self.socket_path,
            )
            .await;

        let pod = match submitted {
            Ok(pod) => pod,
            Err(e) => {
                tracing::error!(
                    node = %self.target.node_name,
                    error = %e,
                    "failed to create privileged pod on node"
                );
                return Err(self.fail(e));
            }
        };

        // Owned from here on, even if the wait below is dropped.
        self.privileged_pod = Some(pod.clone());

        if let Err(e) = self
            .lifecycle
            .wait_until_running(&pod, self.config.pod_creation_timeout)
            .await
        {
            tracing::error!(pod = %pod.name, error = %e, "privileged pod never became ready");
            return Err(self.fail(e));
        }

        tracing::info!(pod = %pod.name, node = %self.target.node_name, "pod created successfully on node");
        self.pod_ready = true;

        if self.bridge.needs_process_id() {
            if let Err(e) = self.resolve_process_id().await {
                return Err(self.fail(e));
            }
        }

        for upload in self.config.uploads.clone() {
            if let Err(e) = self
                .upload(&upload.local_path, &upload.remote_path)
                .await
            {
                return Err(self.fail(e));
            }
        }

        self.state = SessionState::Ready;
        Ok(())
    }

    async fn resolve_process_id(&mut self) -> Result<()> {
        let command = self.bridge.build_inspect_command(&self.target.container_id);
        let mut buffer = Vec::new();

        self.execute_checked(&command, &mut buffer).await?;

        let inspection = String::from_utf8_lossy(&buffer);
        let pid = self.bridge.extract_process_id(&inspection)?;

        tracing::info!(pid = %pid, container = %self.target.container_id, "target process id resolved");
        self.target.process_id = Some(pid);
        Ok(())
    }

    // =========================================================================
    // Start
    // =========================================================================

    /// Runs the bridge's trace command, streaming output into `sink`.
    ///
    /// # Errors
    ///
    /// `Error::ExecutionFailure` if the tracer exits non-zero; transport
    /// errors from the gateway.
    pub async fn start(&mut self, sink: &mut OutputSink<'_>) -> Result<()> {
        self.expect_state(&SessionState::Ready, "ready")?;
        self.state = SessionState::Running;

        tracing::info!("starting remote tracing using privileged pod");

        let request = TraceRequest {
            container_id: self.target.container_id.clone(),
            filter: self.config.filter.clone(),
            process_id: self.target.process_id,
            socket_path: self.socket_path.clone(),
        };
        let command = self.bridge.build_trace_command(&request);

        let result = self.execute_checked(&command, sink).await;
        let flushed = sink.flush().await.map_err(Error::from);

        match result.and(flushed) {
            Ok(()) => {
                tracing::info!("remote tracing using privileged pod completed");
                self.completed = true;
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to start tracing using privileged pod");
                Err(self.fail(e))
            }
        }
    }

    /// Runs the bridge's self-test command in the privileged container.
    pub async fn self_test(&mut self, sink: &mut OutputSink<'_>) -> Result<()> {
        self.expect_state(&SessionState::Ready, "ready")?;

        let command = self.bridge.build_self_test_command();
        let result = self.execute_checked(&command, sink).await;
        let flushed = sink.flush().await.map_err(Error::from);

        match result.and(flushed) {
            Ok(()) => {
                tracing::info!(runtime = %self.bridge.name(), "runtime self-test passed");
                self.completed = true;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Ensures a local file is present inside the privileged container.
    pub async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let pod = self.ready_pod()?;
        self.transfer
            .ensure_uploaded(&TransferRequest {
                local_path: local_path.to_path_buf(),
                remote_path: remote_path.to_string(),
                pod: pod.clone(),
                container: self.config.privileged_container_name.clone(),
            })
            .await
    }

    // =========================================================================
    // Cleanup
    // =========================================================================

    /// Tears down everything Setup created. Runs at most once.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidState` when called twice or before Setup
    /// - `Error::CleanupFailure` if the privileged pod could not be deleted
    pub async fn cleanup(&mut self) -> Result<()> {
        if self.cleaned_up || matches!(self.state, SessionState::Idle) {
            return Err(Error::InvalidState {
                state: self.state.to_string(),
                expected: "set up".to_string(),
            });
        }
        self.cleaned_up = true;

        let Some(pod) = self.privileged_pod.clone() else {
            tracing::debug!("no privileged pod was created, nothing to clean up");
            self.terminate();
            return Ok(());
        };

        self.state = SessionState::CleaningUp;

        if self.pod_ready {
            self.run_bridge_cleanup(&pod).await;
        }

        tracing::info!(pod = %pod.name, "removing pod");

        if let Err(e) = self.lifecycle.delete_privileged_pod(&pod.name).await {
            tracing::error!(pod = %pod.name, error = %e, "failed to remove pod");
            let err = Error::CleanupFailure {
                pod: pod.to_string(),
                reason: e.to_string(),
            };
            self.record(&err);
            self.terminate();
            return Err(err);
        }

        tracing::info!(pod = %pod.name, "pod removed successfully");
        self.terminate();
        Ok(())
    }

    async fn run_bridge_cleanup(&self, pod: &PodRef) {
        let container = &self.config.privileged_container_name;
        tracing::info!(container = %container, "removing privileged container");

        let command = self.bridge.build_cleanup_command();
        let mut discard = tokio::io::sink();

        match self
            .gateway
            .execute(pod, container, &command.argv, &mut discard)
            .await
        {
            Ok(0) => {
                tracing::info!(container = %container, "privileged container removed successfully");
            }
            Ok(exit_code) => {
                tracing::warn!(
                    container = %container,
                    exit_code,
                    "failed to remove privileged container, please manually remove it"
                );
            }
            Err(e) => {
                tracing::warn!(
                    container = %container,
                    error = %e,
                    "failed to remove privileged container, please manually remove it"
                );
            }
        }
    }

    // =========================================================================
    // Scoped Run
    // =========================================================================

    /// Setup, Start, then Cleanup on every exit path once a pod exists.
    ///
    /// Returns the first error; a Cleanup error after an earlier failure is
    /// logged as a warning instead.
    pub async fn run(&mut self, sink: &mut OutputSink<'_>) -> Result<()> {
        self.run_scoped(sink, SessionAction::Trace).await
    }

    /// Like [`Self::run`], but runs the bridge self-test instead of a trace.
    pub async fn run_self_test(&mut self, sink: &mut OutputSink<'_>) -> Result<()> {
        self.run_scoped(sink, SessionAction::SelfTest).await
    }

    async fn run_scoped(&mut self, sink: &mut OutputSink<'_>, action: SessionAction) -> Result<()> {
        tracing::info!(
            pod = %self.target.pod_name,
            namespace = %self.target.namespace,
            container = %self.target.container_name,
            filter = %self.config.filter,
            "tracing has begun"
        );

        let outcome = match self.setup().await {
            Ok(()) => match action {
                SessionAction::Trace => self.start(sink).await,
                SessionAction::SelfTest => self.self_test(sink).await,
            },
            Err(e) => Err(e),
        };

        if !self.needs_cleanup() {
            return outcome;
        }

        tracing::info!("starting tracer cleanup");
        let cleaned = self.cleanup().await;

        match (outcome, cleaned) {
            (Ok(()), Ok(())) => {
                tracing::info!("tracer cleanup completed successfully");
                Ok(())
            }
            (Ok(()), Err(e)) => {
                tracing::error!("failed to teardown tracer, a manual teardown is required");
                Err(e)
            }
            (Err(e), Ok(())) => {
                tracing::info!("tracer cleanup completed successfully");
                Err(e)
            }
            (Err(e), Err(cleanup_err)) => {
                tracing::warn!(
                    error = %cleanup_err,
                    "failed to teardown tracer, a manual teardown is required"
                );
                Err(e)
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Executes `command` in the privileged container; non-zero is an error.
    async fn execute_checked(
        &self,
        command: &RuntimeCommand,
        sink: &mut OutputSink<'_>,
    ) -> Result<()> {
        let pod = self.ready_pod()?;
        let container = &self.config.privileged_container_name;

        tracing::info!(
            command = %command.display(),
            kind = %command.kind,
            container = %container,
            pod = %pod.name,
            namespace = %pod.namespace,
            "executing command"
        );

        let exit_code = self
            .gateway
            .execute(pod, container, &command.argv, sink)
            .await?;

        if exit_code != 0 {
            tracing::error!(command = %command.display(), exit_code, "failed executing command");
            return Err(Error::ExecutionFailure {
                command: command.display(),
                exit_code,
            });
        }

        tracing::info!(command = %command.display(), exit_code, "command executed successfully");
        Ok(())
    }

    fn ready_pod(&self) -> Result<&PodRef> {
        match &self.privileged_pod {
            Some(pod) if self.pod_ready && !self.cleaned_up => Ok(pod),
            _ => Err(Error::InvalidState {
                state: self.state.to_string(),
                expected: "ready".to_string(),
            }),
        }
    }

    fn expect_state(&self, expected: &SessionState, name: &str) -> Result<()> {
        if &self.state != expected {
            return Err(Error::InvalidState {
                state: self.state.to_string(),
                expected: name.to_string(),
            });
        }
        Ok(())
    }

    fn record(&mut self, err: &Error) {
        if self.first_error.is_none() {
            self.first_error = Some(err.to_string());
        }
    }

    /// Records `err` as the session's failure and hands it back.
    ///
    /// Without a privileged pod there is nothing left to clean up, so the
    /// session terminates right away.
    fn fail(&mut self, err: Error) -> Error {
        self.record(&err);
        if self.privileged_pod.is_none() {
            self.terminate();
        }
        err
    }

    /// Ends the session. Without a successful Start the outcome is a
    /// failure even if nothing errored.
    fn terminate(&mut self) {
        let outcome = match &self.first_error {
            Some(msg) => SessionOutcome::Failure(msg.clone()),
            None if !self.completed => {
                SessionOutcome::Failure("cleaned up before tracing started".to_string())
            }
            None => SessionOutcome::Success,
        };
        self.state = SessionState::Terminated(outcome);
    }
}
