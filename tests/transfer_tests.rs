//! Integration tests for idempotent remote file transfer.

mod common;

use common::{Call, ExecResponse, MockGateway, UploadBehavior, privileged_pod};
use doktor::{Error, RemoteFileTransfer, TransferRequest};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;

// =============================================================================
// Test Helpers
// =============================================================================

const REMOTE: &str = "/usr/local/bin/probe.bt";
const CONTAINER: &str = "doktor-privileged";

fn request(local: PathBuf) -> TransferRequest {
    TransferRequest {
        local_path: local,
        remote_path: REMOTE.to_string(),
        pod: privileged_pod(),
        container: CONTAINER.to_string(),
    }
}

fn transfer(gateway: &Arc<MockGateway>) -> RemoteFileTransfer {
    RemoteFileTransfer::new(gateway.clone())
}

// =============================================================================
// Presence Tests
// =============================================================================

#[tokio::test]
async fn test_exists_on_target() {
    let gateway = Arc::new(MockGateway::new().with_remote_file(REMOTE));
    let transfer = transfer(&gateway);

    assert!(transfer.exists_on_target(REMOTE, &privileged_pod(), CONTAINER).await.unwrap());
    assert!(!transfer
        .exists_on_target("/missing", &privileged_pod(), CONTAINER)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_transport_error_is_not_absence() {
    let gateway = Arc::new(MockGateway::new().with_exec_rule("test -f", ExecResponse::TransportError));
    let transfer = transfer(&gateway);

    let result = transfer.exists_on_target(REMOTE, &privileged_pod(), CONTAINER).await;
    assert!(matches!(result, Err(Error::Gateway { .. })));
}

// =============================================================================
// Upload Tests
// =============================================================================

#[tokio::test]
async fn test_present_file_is_not_uploaded() {
    let local = NamedTempFile::new().unwrap();
    let gateway = Arc::new(MockGateway::new().with_remote_file(REMOTE));

    transfer(&gateway)
        .ensure_uploaded(&request(local.path().to_path_buf()))
        .await
        .unwrap();

    assert_eq!(gateway.upload_count(), 0);
}

#[tokio::test]
async fn test_upload_is_idempotent() {
    let local = NamedTempFile::new().unwrap();
    let gateway = Arc::new(MockGateway::new());
    let transfer = transfer(&gateway);
    let request = request(local.path().to_path_buf());

    transfer.ensure_uploaded(&request).await.unwrap();
    transfer.ensure_uploaded(&request).await.unwrap();

    assert_eq!(gateway.upload_count(), 1);
    assert!(gateway
        .calls()
        .contains(&Call::Upload(local.path().to_path_buf(), REMOTE.to_string())));
}

#[tokio::test]
async fn test_upload_verified_after_copy() {
    let local = NamedTempFile::new().unwrap();
    let gateway = Arc::new(MockGateway::new());

    transfer(&gateway)
        .upload(local.path(), REMOTE, &privileged_pod(), CONTAINER)
        .await
        .unwrap();

    // check, copy, check again
    let checks = gateway
        .executed()
        .iter()
        .filter(|argv| argv.get(2).is_some_and(|s| s.starts_with("test -f")))
        .count();
    assert_eq!(checks, 2);
}

#[tokio::test]
async fn test_verification_failure() {
    let local = NamedTempFile::new().unwrap();
    let gateway =
        Arc::new(MockGateway::new().with_upload_behavior(UploadBehavior::SucceedWithoutFile));

    let err = transfer(&gateway)
        .ensure_uploaded(&request(local.path().to_path_buf()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UploadVerificationFailed { ref remote } if remote == REMOTE));
}

#[tokio::test]
async fn test_non_zero_copy_exit() {
    let local = NamedTempFile::new().unwrap();
    let gateway = Arc::new(MockGateway::new().with_upload_behavior(UploadBehavior::Exit(1)));

    let err = transfer(&gateway)
        .ensure_uploaded(&request(local.path().to_path_buf()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UploadFailed { exit_code: Some(1), .. }));
}

#[tokio::test]
async fn test_copy_transport_error() {
    let local = NamedTempFile::new().unwrap();
    let gateway =
        Arc::new(MockGateway::new().with_upload_behavior(UploadBehavior::TransportError));

    let err = transfer(&gateway)
        .ensure_uploaded(&request(local.path().to_path_buf()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UploadFailed { exit_code: None, .. }));
}

#[tokio::test]
async fn test_missing_local_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.bt");
    let gateway = Arc::new(MockGateway::new());

    let err = transfer(&gateway)
        .ensure_uploaded(&request(missing.clone()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::LocalFileNotFound(ref path) if path == &missing));
    assert_eq!(gateway.upload_count(), 0);
}
