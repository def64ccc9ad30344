//! Integration tests for the tracer session lifecycle.
//!
//! Every scenario runs against the in-memory gateway in `common`, so the
//! order and count of cluster calls can be asserted exactly.

mod common;

use common::{
    Call, ExecResponse, MockGateway, NODE_NAME, PRIVILEGED_POD, TARGET_PID, UploadBehavior,
    privileged_pod, target,
};
use doktor::{
    DockerBridge, Error, ProcessId, SessionConfig, SessionOutcome, SessionState,
    SupportedRuntimes, TracerSession, UploadSpec,
};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Test Helpers
// =============================================================================

fn session_with(gateway: &Arc<MockGateway>, config: SessionConfig) -> TracerSession {
    TracerSession::new(
        target(),
        config,
        gateway.clone(),
        Box::new(DockerBridge::new()),
        SupportedRuntimes::default(),
    )
}

fn session(gateway: &Arc<MockGateway>) -> TracerSession {
    session_with(gateway, SessionConfig::default())
}

fn joined(argv: &[String]) -> String {
    argv.join(" ")
}

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test]
async fn test_run_setup_start_cleanup() {
    let gateway = Arc::new(
        MockGateway::new().with_exec_rule("bpftrace", ExecResponse::ok("execve: /bin/ls\n")),
    );
    let mut session = session(&gateway);
    let mut out = Vec::new();

    session.run(&mut out).await.unwrap();

    assert_eq!(session.state(), &SessionState::Terminated(SessionOutcome::Success));
    assert_eq!(String::from_utf8(out).unwrap(), "execve: /bin/ls\n");
    assert_eq!(session.target().process_id, Some(ProcessId::new(TARGET_PID)));

    assert_eq!(gateway.created().len(), 1);
    assert_eq!(gateway.deleted(), vec![privileged_pod()]);

    let executed = gateway.executed();
    assert_eq!(executed.len(), 3);
    assert!(joined(&executed[0]).contains("inspect --format {{.State.Pid}} 0123abcd"));
    assert!(joined(&executed[1]).contains(&format!("bpftrace -p {TARGET_PID} -e")));
    assert!(joined(&executed[2]).contains("rm -f doktor-tracer-"));
}

#[tokio::test]
async fn test_setup_pins_pod_to_target_node() {
    let gateway = Arc::new(MockGateway::new());
    let mut session = session(&gateway);

    session.setup().await.unwrap();
    assert_eq!(session.state(), &SessionState::Ready);
    assert_eq!(session.privileged_pod(), Some(&privileged_pod()));

    let spec = &gateway.created()[0];
    assert_eq!(spec.node_name, NODE_NAME);
    assert_eq!(spec.namespace, "shop");
    assert_eq!(spec.image, "docker:latest");
    assert_eq!(spec.volume_mounts[0].mount_path, "/var/run/docker.sock");

    session.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_overrides_reach_pod_and_tracer() {
    let gateway = Arc::new(MockGateway::new());
    let config = SessionConfig::default()
        .with_image("registry.local/doktor:1.2")
        .with_socket_path("/run/docker.sock")
        .with_filter("tracepoint:syscalls:sys_enter_openat { @[comm] = count(); }");
    let mut session = session_with(&gateway, config);
    let mut out = Vec::new();

    session.run(&mut out).await.unwrap();

    let spec = &gateway.created()[0];
    assert_eq!(spec.image, "registry.local/doktor:1.2");
    assert_eq!(spec.volume_mounts[0].mount_path, "/run/docker.sock");

    let trace = joined(&gateway.executed()[1]);
    assert!(trace.starts_with("docker --host unix:///run/docker.sock run"));
    assert!(trace.ends_with("sys_enter_openat { @[comm] = count(); }"));
}

#[tokio::test]
async fn test_run_self_test() {
    let gateway = Arc::new(MockGateway::new());
    let mut session = session(&gateway);
    let mut out = Vec::new();

    session.run_self_test(&mut out).await.unwrap();

    let executed = gateway.executed();
    assert!(executed.iter().any(|argv| argv.last().map(String::as_str) == Some("version")));
    assert!(!executed.iter().any(|argv| argv.contains(&"bpftrace".to_string())));
    assert_eq!(gateway.deleted().len(), 1);
}

// =============================================================================
// Failure Paths
// =============================================================================

#[tokio::test]
async fn test_start_failure_still_cleans_up() {
    let gateway = Arc::new(MockGateway::new().with_exec_rule("bpftrace", ExecResponse::exit(1)));
    let mut session = session(&gateway);
    let mut out = Vec::new();

    let err = session.run(&mut out).await.unwrap_err();

    assert!(matches!(err, Error::ExecutionFailure { exit_code: 1, .. }));
    assert!(matches!(
        session.state(),
        SessionState::Terminated(SessionOutcome::Failure(_))
    ));
    assert_eq!(gateway.deleted(), vec![privileged_pod()]);
}

#[tokio::test]
async fn test_start_transport_error_still_cleans_up() {
    let gateway = Arc::new(
        MockGateway::new().with_exec_rule("bpftrace", ExecResponse::TransportError),
    );
    let mut session = session(&gateway);
    let mut out = Vec::new();

    let err = session.run(&mut out).await.unwrap_err();

    assert!(matches!(err, Error::Gateway { .. }));
    assert_eq!(gateway.deleted().len(), 1);
}

#[tokio::test]
async fn test_cleanup_command_failure_is_not_fatal() {
    let gateway = Arc::new(MockGateway::new().with_exec_rule(" rm -f ", ExecResponse::exit(1)));
    let mut session = session(&gateway);
    let mut out = Vec::new();

    session.run(&mut out).await.unwrap();

    assert_eq!(session.state(), &SessionState::Terminated(SessionOutcome::Success));
    assert_eq!(gateway.deleted().len(), 1);
}

#[tokio::test]
async fn test_delete_failure_is_cleanup_failure() {
    let gateway = Arc::new(MockGateway::new().failing_delete());
    let mut session = session(&gateway);
    let mut out = Vec::new();

    let err = session.run(&mut out).await.unwrap_err();

    assert!(matches!(err, Error::CleanupFailure { .. }));
    assert!(matches!(
        session.state(),
        SessionState::Terminated(SessionOutcome::Failure(_))
    ));
}

#[tokio::test]
async fn test_start_error_wins_over_cleanup_error() {
    let gateway = Arc::new(
        MockGateway::new()
            .with_exec_rule("bpftrace", ExecResponse::exit(2))
            .failing_delete(),
    );
    let mut session = session(&gateway);
    let mut out = Vec::new();

    let err = session.run(&mut out).await.unwrap_err();

    assert!(matches!(err, Error::ExecutionFailure { exit_code: 2, .. }));
    match session.state() {
        SessionState::Terminated(SessionOutcome::Failure(msg)) => {
            assert!(msg.contains("exit code 2"));
        }
        other => panic!("unexpected state {other:?}"),
    }
}

#[tokio::test]
async fn test_unsupported_runtime_creates_nothing() {
    let gateway = Arc::new(MockGateway::new().with_node_runtime("containerd://1.6.8"));
    let mut session = session(&gateway);
    let mut out = Vec::new();

    let err = session.run(&mut out).await.unwrap_err();

    match err {
        Error::UnsupportedRuntime { runtime, node, .. } => {
            assert_eq!(runtime, "containerd://1.6.8");
            assert_eq!(node.as_deref(), Some(NODE_NAME));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(gateway.created().is_empty());
    assert!(gateway.deleted().is_empty());
    assert!(!session.needs_cleanup());
    assert!(matches!(
        session.state(),
        SessionState::Terminated(SessionOutcome::Failure(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_creation_timeout_still_deletes_pod() {
    let gateway = Arc::new(MockGateway::new().never_running());
    let config = SessionConfig::default().with_pod_creation_timeout(Duration::from_secs(5));
    let mut session = session_with(&gateway, config);
    let mut out = Vec::new();

    let err = session.run(&mut out).await.unwrap_err();

    assert!(matches!(err, Error::PodCreationTimeout { ref pod, .. } if pod == PRIVILEGED_POD));
    assert_eq!(gateway.deleted(), vec![privileged_pod()]);
    // The container never ran, so no runtime command was attempted.
    assert!(gateway.executed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_readiness_wait_still_owns_pod() {
    let gateway = Arc::new(MockGateway::new().with_pending_polls(30));
    let mut session = session(&gateway);
    let mut out = Vec::new();

    // Dropping the run future mid-wait is what Ctrl-C in the binary does.
    let abandoned = tokio::time::timeout(Duration::from_secs(3), session.run(&mut out)).await;
    assert!(abandoned.is_err());

    assert_eq!(gateway.created().len(), 1);
    assert!(session.needs_cleanup());
    assert_eq!(session.privileged_pod(), Some(&privileged_pod()));

    session.cleanup().await.unwrap();

    assert_eq!(gateway.deleted(), vec![privileged_pod()]);
    assert!(gateway.executed().is_empty());
    assert!(!session.needs_cleanup());
}

#[tokio::test]
async fn test_process_id_parse_failure_cleans_up() {
    let gateway = Arc::new(
        MockGateway::new().with_exec_rule(" inspect ", ExecResponse::ok("<no value>\n")),
    );
    let mut session = session(&gateway);
    let mut out = Vec::new();

    let err = session.run(&mut out).await.unwrap_err();

    assert!(matches!(err, Error::ProcessIdParse { .. }));
    assert_eq!(gateway.deleted().len(), 1);
    assert!(session.target().process_id.is_none());
}

// =============================================================================
// Cleanup Semantics
// =============================================================================

#[tokio::test]
async fn test_second_cleanup_is_invalid_state() {
    let gateway = Arc::new(MockGateway::new());
    let mut session = session(&gateway);
    let mut out = Vec::new();

    session.setup().await.unwrap();
    session.start(&mut out).await.unwrap();
    session.cleanup().await.unwrap();

    let calls_before = gateway.calls().len();
    let err = session.cleanup().await.unwrap_err();

    assert!(matches!(err, Error::InvalidState { .. }));
    assert_eq!(gateway.calls().len(), calls_before);
    assert_eq!(gateway.deleted().len(), 1);
}

#[tokio::test]
async fn test_cleanup_before_setup_is_invalid_state() {
    let gateway = Arc::new(MockGateway::new());
    let mut session = session(&gateway);

    assert!(matches!(
        session.cleanup().await,
        Err(Error::InvalidState { .. })
    ));
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn test_start_requires_ready() {
    let gateway = Arc::new(MockGateway::new());
    let mut session = session(&gateway);
    let mut out = Vec::new();

    assert!(matches!(
        session.start(&mut out).await,
        Err(Error::InvalidState { .. })
    ));
    assert_eq!(session.state(), &SessionState::Idle);
}

#[tokio::test]
async fn test_cleanup_without_start_is_not_success() {
    let gateway = Arc::new(MockGateway::new());
    let mut session = session(&gateway);

    session.setup().await.unwrap();
    session.cleanup().await.unwrap();

    match session.state() {
        SessionState::Terminated(SessionOutcome::Failure(msg)) => {
            assert!(msg.contains("before tracing started"));
        }
        other => panic!("unexpected state {other:?}"),
    }
    assert_eq!(gateway.deleted().len(), 1);
}

#[tokio::test]
async fn test_cleanup_removes_tracer_then_pod() {
    let gateway = Arc::new(MockGateway::new());
    let mut session = session(&gateway);

    session.setup().await.unwrap();
    session.cleanup().await.unwrap();

    let calls = gateway.calls();
    let rm = calls
        .iter()
        .position(|c| matches!(c, Call::Execute(argv) if argv.contains(&"rm".to_string())))
        .unwrap();
    let delete = calls
        .iter()
        .position(|c| matches!(c, Call::DeletePod(..)))
        .unwrap();
    assert!(rm < delete);
}

// =============================================================================
// Uploads
// =============================================================================

#[tokio::test]
async fn test_configured_upload_runs_during_setup() {
    let local = tempfile::NamedTempFile::new().unwrap();
    let gateway = Arc::new(MockGateway::new());
    let config = SessionConfig::default().with_upload(UploadSpec {
        local_path: local.path().to_path_buf(),
        remote_path: "/tmp/probe.bt".to_string(),
    });
    let mut session = session_with(&gateway, config);

    session.setup().await.unwrap();
    assert_eq!(gateway.upload_count(), 1);

    // Already present now: a second request uploads nothing.
    session.upload(local.path(), "/tmp/probe.bt").await.unwrap();
    assert_eq!(gateway.upload_count(), 1);

    session.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_failed_upload_fails_setup_and_cleans_up() {
    let local = tempfile::NamedTempFile::new().unwrap();
    let gateway = Arc::new(MockGateway::new().with_upload_behavior(UploadBehavior::Exit(1)));
    let config = SessionConfig::default().with_upload(UploadSpec {
        local_path: local.path().to_path_buf(),
        remote_path: "/tmp/probe.bt".to_string(),
    });
    let mut session = session_with(&gateway, config);
    let mut out = Vec::new();

    let err = session.run(&mut out).await.unwrap_err();

    assert!(matches!(err, Error::UploadFailed { exit_code: Some(1), .. }));
    assert_eq!(gateway.deleted().len(), 1);
}

#[tokio::test]
async fn test_upload_requires_running_pod() {
    let local = tempfile::NamedTempFile::new().unwrap();
    let gateway = Arc::new(MockGateway::new());
    let session = session(&gateway);

    assert!(matches!(
        session.upload(local.path(), "/tmp/probe.bt").await,
        Err(Error::InvalidState { .. })
    ));
}
