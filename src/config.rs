//! Session configuration.
//!
//! Everything a caller can tune about one tracing session. Unset image and
//! socket path fall back to the bound runtime bridge's defaults at `Setup`.

use crate::constants::{
    DEFAULT_POD_CREATION_TIMEOUT, POD_READY_POLL_INTERVAL, PRIVILEGED_CONTAINER_NAME,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// A local file to place in the privileged container during `Setup`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSpec {
    /// File on the local machine.
    pub local_path: PathBuf,
    /// Destination inside the privileged container.
    pub remote_path: String,
}

impl UploadSpec {
    /// Parses `<local>:<remote>`.
    ///
    /// The split happens at the last `:` so that local paths containing a
    /// colon still work; the remote side must be absolute.
    pub fn parse(value: &str) -> Result<Self> {
        let (local, remote) = value.rsplit_once(':').ok_or_else(|| {
            Error::InvalidInput(format!("upload '{value}' must be <local>:<remote>"))
        })?;

        if local.is_empty() {
            return Err(Error::InvalidInput(format!(
                "upload '{value}' has an empty local path"
            )));
        }

        if !remote.starts_with('/') {
            return Err(Error::InvalidInput(format!(
                "upload '{value}' remote path must be absolute"
            )));
        }

        Ok(Self {
            local_path: PathBuf::from(local),
            remote_path: remote.to_string(),
        })
    }
}

impl std::str::FromStr for UploadSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Configuration of one tracing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Privileged container image; `None` uses the bridge default.
    pub image: Option<String>,
    /// Runtime socket path on the node; `None` uses the bridge default.
    pub socket_path: Option<String>,
    /// Tracer filter expression; empty uses the bridge default program.
    pub filter: String,
    /// How long to wait for the privileged pod to run (zero = forever).
    #[serde(with = "duration_secs")]
    pub pod_creation_timeout: Duration,
    /// Interval between readiness polls.
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    /// Name of the container inside the privileged pod.
    pub privileged_container_name: String,
    /// Files placed in the privileged container at the end of `Setup`.
    pub uploads: Vec<UploadSpec>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            image: None,
            socket_path: None,
            filter: String::new(),
            pod_creation_timeout: DEFAULT_POD_CREATION_TIMEOUT,
            poll_interval: POD_READY_POLL_INTERVAL,
            privileged_container_name: PRIVILEGED_CONTAINER_NAME.to_string(),
            uploads: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Sets the image override.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Sets the socket path override.
    #[must_use]
    pub fn with_socket_path(mut self, socket_path: impl Into<String>) -> Self {
        self.socket_path = Some(socket_path.into());
        self
    }

    /// Sets the tracer filter.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Sets the pod creation timeout.
    #[must_use]
    pub fn with_pod_creation_timeout(mut self, timeout: Duration) -> Self {
        self.pod_creation_timeout = timeout;
        self
    }

    /// Sets the readiness poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Adds a file to upload during `Setup`.
    #[must_use]
    pub fn with_upload(mut self, upload: UploadSpec) -> Self {
        self.uploads.push(upload);
        self
    }

    /// Checks the configuration for values that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidInput(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.privileged_container_name.is_empty() {
            return Err(Error::InvalidInput(
                "privileged container name cannot be empty".to_string(),
            ));
        }
        if matches!(&self.image, Some(image) if image.trim().is_empty()) {
            return Err(Error::InvalidInput("image override is empty".to_string()));
        }
        if matches!(&self.socket_path, Some(path) if !path.starts_with('/')) {
            return Err(Error::InvalidInput(
                "socket path override must be absolute".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
