//! Docker runtime bridge.
//!
//! Drives the `docker` CLI inside the privileged container, talking to the
//! node's daemon through the mounted socket. The tracer itself runs as a
//! sibling container started by the daemon, sharing the host pid namespace.
//!
//! # Commands
//!
//! | Action    | Command                                                        |
//! |-----------|----------------------------------------------------------------|
//! | Inspect   | `docker inspect --format {{.State.Pid}} <id>`                  |
//! | Trace     | `docker run --rm --name <tracer> --pid host ... bpftrace ...`  |
//! | Cleanup   | `docker rm -f <tracer>`                                        |
//! | SelfTest  | `docker version`                                               |

use crate::constants::{DEFAULT_TRACE_PROGRAM, DEFAULT_TRACER_IMAGE};
use crate::error::{Error, Result};
use crate::runtime::{CommandKind, ProcessId, RuntimeBridge, RuntimeCommand, TraceRequest};

/// Image for the privileged container: ships the docker CLI.
const DOCKER_DEFAULT_IMAGE: &str = "docker:latest";

/// Default docker daemon socket on the node.
const DOCKER_DEFAULT_SOCKET_PATH: &str = "/var/run/docker.sock";

/// Prefix for the tracer container's name.
const TRACER_NAME_PREFIX: &str = "doktor-tracer-";

/// Bridge for docker-compatible runtimes.
#[derive(Debug, Clone)]
pub struct DockerBridge {
    /// Name of the tracer container, fixed for the bridge's lifetime so that
    /// cleanup removes the same container trace started.
    tracer_name: String,
    /// Image the tracer container runs.
    tracer_image: String,
    /// Socket the CLI talks to, unless a `TraceRequest` names another.
    socket_path: String,
}

impl DockerBridge {
    /// Creates a docker bridge with a freshly generated tracer name.
    pub fn new() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            tracer_name: format!("{TRACER_NAME_PREFIX}{}", &suffix[..8]),
            tracer_image: DEFAULT_TRACER_IMAGE.to_string(),
            socket_path: DOCKER_DEFAULT_SOCKET_PATH.to_string(),
        }
    }

    /// Overrides the tracer image.
    #[must_use]
    pub fn with_tracer_image(mut self, image: impl Into<String>) -> Self {
        self.tracer_image = image.into();
        self
    }

    /// Overrides the socket path used by inspect, cleanup, and self-test.
    #[must_use]
    pub fn with_socket_path(mut self, socket_path: impl Into<String>) -> Self {
        self.socket_path = socket_path.into();
        self
    }

    /// Returns the tracer container name.
    pub fn tracer_name(&self) -> &str {
        &self.tracer_name
    }

    fn docker(&self, socket_path: &str) -> Vec<String> {
        vec![
            "docker".to_string(),
            "--host".to_string(),
            format!("unix://{socket_path}"),
        ]
    }
}

impl Default for DockerBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBridge for DockerBridge {
    fn name(&self) -> &str {
        "docker"
    }

    fn needs_process_id(&self) -> bool {
        true
    }

    fn build_inspect_command(&self, container_id: &str) -> RuntimeCommand {
        let mut argv = self.docker(&self.socket_path);
        argv.extend([
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Pid}}".to_string(),
            container_id.to_string(),
        ]);
        RuntimeCommand::new(CommandKind::Inspect, argv)
    }

    fn extract_process_id(&self, inspection: &str) -> Result<ProcessId> {
        let trimmed = inspection.trim();
        let parse_error = |reason: &str| Error::ProcessIdParse {
            output: trimmed.to_string(),
            reason: reason.to_string(),
        };

        if trimmed.is_empty() {
            return Err(parse_error("empty inspection output"));
        }

        let pid: u32 = trimmed
            .parse()
            .map_err(|e: std::num::ParseIntError| parse_error(&e.to_string()))?;

        // docker reports 0 for containers that are not running
        if pid == 0 {
            return Err(parse_error("container is not running"));
        }

        Ok(ProcessId::new(pid))
    }

    fn build_trace_command(&self, request: &TraceRequest) -> RuntimeCommand {
        let socket_path = if request.socket_path.is_empty() {
            self.socket_path.as_str()
        } else {
            request.socket_path.as_str()
        };

        let mut argv = self.docker(socket_path);
        argv.extend(
            [
                "run",
                "--rm",
                "--name",
                self.tracer_name.as_str(),
                "--privileged",
                "--pid",
                "host",
                "-v",
                "/sys:/sys:ro",
                "-v",
                "/sys/kernel/debug:/sys/kernel/debug",
                self.tracer_image.as_str(),
                "bpftrace",
            ]
            .map(String::from),
        );

        if let Some(pid) = request.process_id {
            argv.push("-p".to_string());
            argv.push(pid.to_string());
        }

        let program = if request.filter.trim().is_empty() {
            DEFAULT_TRACE_PROGRAM
        } else {
            request.filter.as_str()
        };
        argv.push("-e".to_string());
        argv.push(program.to_string());

        let command = RuntimeCommand::new(CommandKind::Trace, argv);
        if request.process_id.is_some() {
            command.with_process_id()
        } else {
            command
        }
    }

    fn build_self_test_command(&self) -> RuntimeCommand {
        let mut argv = self.docker(&self.socket_path);
        argv.push("version".to_string());
        RuntimeCommand::new(CommandKind::SelfTest, argv)
    }

    fn build_cleanup_command(&self) -> RuntimeCommand {
        let mut argv = self.docker(&self.socket_path);
        argv.extend(["rm".to_string(), "-f".to_string(), self.tracer_name.clone()]);
        RuntimeCommand::new(CommandKind::Cleanup, argv)
    }

    fn default_image(&self) -> &str {
        DOCKER_DEFAULT_IMAGE
    }

    fn default_socket_path(&self) -> &str {
        &self.socket_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracer_name_generation() {
        let bridge = DockerBridge::new();
        assert!(bridge.tracer_name().starts_with(TRACER_NAME_PREFIX));
        assert_eq!(bridge.tracer_name().len(), TRACER_NAME_PREFIX.len() + 8);
        assert_ne!(bridge.tracer_name(), DockerBridge::new().tracer_name());
    }

    #[test]
    fn test_extract_pid_with_newline() {
        let bridge = DockerBridge::new();
        assert_eq!(bridge.extract_process_id("4242\n").unwrap().as_u32(), 4242);
    }

    #[test]
    fn test_socket_override_applies_to_inspect() {
        let bridge = DockerBridge::new().with_socket_path("/run/docker.sock");
        let cmd = bridge.build_inspect_command("abc");
        assert_eq!(cmd.argv[2], "unix:///run/docker.sock");
        assert_eq!(cmd.argv.last().map(String::as_str), Some("abc"));
    }
}
