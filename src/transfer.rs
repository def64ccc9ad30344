//! Idempotent "ensure file present" on a remote container.
//!
//! Presence is re-derived from the target every time; nothing is cached and
//! a completed upload is never trusted without a second existence check.
//!
//! ```text
//! exists? ──yes──▶ done (no upload)
//!    │ no
//!    ▼
//! upload ──fail──▶ UploadFailed
//!    │ ok
//!    ▼
//! exists? ──no──▶ UploadVerificationFailed
//!    │ yes
//!    ▼
//!  done
//! ```

use crate::error::{Error, Result};
use crate::gateway::{ClusterApiGateway, PodRef};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shell-quotes a string for safe use in `sh -c`.
fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Builds the presence-check command for `remote_path`.
pub fn presence_check_command(remote_path: &str) -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!("test -f {}", shell_escape(remote_path)),
    ]
}

/// A single file to place on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// File on the local machine.
    pub local_path: PathBuf,
    /// Destination path inside the container.
    pub remote_path: String,
    /// Pod to upload into.
    pub pod: PodRef,
    /// Container to upload into.
    pub container: String,
}

/// Uploads files through the gateway's exec and copy primitives.
pub struct RemoteFileTransfer {
    gateway: Arc<dyn ClusterApiGateway>,
}

impl RemoteFileTransfer {
    /// Creates a transfer helper over `gateway`.
    pub fn new(gateway: Arc<dyn ClusterApiGateway>) -> Self {
        Self { gateway }
    }

    /// Checks whether `remote_path` exists as a regular file.
    ///
    /// # Errors
    ///
    /// Transport failures are returned as errors, distinct from `Ok(false)`.
    pub async fn exists_on_target(
        &self,
        remote_path: &str,
        pod: &PodRef,
        container: &str,
    ) -> Result<bool> {
        let command = presence_check_command(remote_path);
        let mut stdout = Vec::new();

        let exit_code = self
            .gateway
            .execute(pod, container, &command, &mut stdout)
            .await?;

        if exit_code != 0 {
            tracing::debug!(path = %remote_path, exit_code, "file not found on target");
            return Ok(false);
        }

        tracing::info!(path = %remote_path, "file found");
        Ok(true)
    }

    /// Makes sure `request.local_path` is present at `request.remote_path`.
    ///
    /// # Errors
    ///
    /// - `Error::LocalFileNotFound` if there is nothing to upload
    /// - `Error::UploadFailed` if the copy errors or exits non-zero
    /// - `Error::UploadVerificationFailed` if the file is still absent after
    ///   a successful copy
    /// - transport errors from the existence checks
    pub async fn ensure_uploaded(&self, request: &TransferRequest) -> Result<()> {
        let TransferRequest {
            local_path,
            remote_path,
            pod,
            container,
        } = request;

        tracing::info!(
            local = %local_path.display(),
            remote = %remote_path,
            container = %container,
            "uploading file"
        );

        if self.exists_on_target(remote_path, pod, container).await? {
            tracing::info!(remote = %remote_path, "file was already found on remote pod");
            return Ok(());
        }

        if !local_path.exists() {
            return Err(Error::LocalFileNotFound(local_path.clone()));
        }

        tracing::info!(remote = %remote_path, "file not found, starting to upload");

        match self
            .gateway
            .upload_file(local_path, remote_path, pod, container)
            .await
        {
            Ok(0) => {}
            Ok(exit_code) => {
                return Err(Error::UploadFailed {
                    remote: remote_path.clone(),
                    exit_code: Some(exit_code),
                    reason: "copy exited non-zero".to_string(),
                });
            }
            Err(e) => {
                return Err(Error::UploadFailed {
                    remote: remote_path.clone(),
                    exit_code: None,
                    reason: e.to_string(),
                });
            }
        }

        tracing::info!(remote = %remote_path, "verifying file uploaded successfully");

        if !self.exists_on_target(remote_path, pod, container).await? {
            tracing::error!(remote = %remote_path, "failed to upload file");
            return Err(Error::UploadVerificationFailed {
                remote: remote_path.clone(),
            });
        }

        tracing::info!(remote = %remote_path, "file uploaded successfully");
        Ok(())
    }

    /// Convenience wrapper around [`RemoteFileTransfer::ensure_uploaded`].
    pub async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        pod: &PodRef,
        container: &str,
    ) -> Result<()> {
        self.ensure_uploaded(&TransferRequest {
            local_path: local_path.to_path_buf(),
            remote_path: remote_path.to_string(),
            pod: pod.clone(),
            container: container.to_string(),
        })
        .await
    }
}
