//! Runtime bridge trait - runtime-specific command construction.
//!
//! A bridge translates an abstract diagnostic intent into the argument
//! vector that must run inside the privileged container:
//! - `Inspect`: resolve the target container's host process id
//! - `Trace`: start the diagnostic tracer against the target
//! - `Cleanup`: remove anything the trace left behind
//! - `SelfTest`: check that the runtime client can reach its socket
//!
//! # Lifecycle
//!
//! ```text
//! [inspect(container_id) → extract_process_id(output)] → trace(..) → cleanup()
//! ```
//!
//! Bridges are pure: they build commands, the gateway runs them.

use crate::constants::DEFAULT_SUPPORTED_RUNTIMES;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// Supported Runtimes
// =============================================================================

/// Immutable set of container runtime names the engine accepts.
///
/// Injected into the bridge factory and the pod lifecycle manager so both
/// agree on what "supported" means.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedRuntimes {
    names: BTreeSet<String>,
}

impl SupportedRuntimes {
    /// Creates a set from runtime names (stored lowercase).
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().trim().to_ascii_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    /// Returns true if `name` is exactly one of the supported runtimes.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.trim().to_ascii_lowercase())
    }

    /// Returns true if a node's reported runtime version string (for example
    /// `docker://20.10.7`) starts with one of the supported runtime names.
    ///
    /// Matching ignores case and whatever version suffix follows the name.
    pub fn is_supported_runtime(&self, runtime_version: &str) -> bool {
        let version = runtime_version.trim().to_ascii_lowercase();
        self.names.iter().any(|name| version.starts_with(name.as_str()))
    }

    /// Returns the names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.names.iter().cloned().collect()
    }

    /// Returns true if no runtime is supported.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for SupportedRuntimes {
    fn default() -> Self {
        Self::new(DEFAULT_SUPPORTED_RUNTIMES.iter().copied())
    }
}

// =============================================================================
// Runtime Commands
// =============================================================================

/// Abstract action a bridge can translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    /// Inspect the target container.
    Inspect,
    /// Start the diagnostic tracer.
    Trace,
    /// Remove tracer leftovers.
    Cleanup,
    /// Check the runtime client works.
    SelfTest,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inspect => write!(f, "inspect"),
            Self::Trace => write!(f, "trace"),
            Self::Cleanup => write!(f, "cleanup"),
            Self::SelfTest => write!(f, "self-test"),
        }
    }
}

/// A concrete command built by a bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeCommand {
    /// Which action this command implements.
    pub kind: CommandKind,
    /// Ordered argument vector (`argv[0]` is the program).
    pub argv: Vec<String>,
    /// True if the command embeds the target process id.
    pub requires_process_id: bool,
}

impl RuntimeCommand {
    /// Creates a command from string-like arguments.
    pub fn new<I, S>(kind: CommandKind, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            argv: argv.into_iter().map(Into::into).collect(),
            requires_process_id: false,
        }
    }

    /// Marks the command as embedding the target process id.
    #[must_use]
    pub fn with_process_id(mut self) -> Self {
        self.requires_process_id = true;
        self
    }

    /// Returns the command as a single display string.
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Host process id of the target container's main process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Wraps a raw pid.
    pub fn new(pid: u32) -> Self {
        Self(pid)
    }

    /// Returns the raw pid.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inputs needed to build a trace command.
#[derive(Debug, Clone, Default)]
pub struct TraceRequest {
    /// Target container ID (without the `<runtime>://` prefix).
    pub container_id: String,
    /// Tracer filter / program (empty means the bridge default).
    pub filter: String,
    /// Target process id, if the bridge needed to resolve one.
    pub process_id: Option<ProcessId>,
    /// Runtime socket path as mounted in the privileged container.
    pub socket_path: String,
}

// =============================================================================
// Runtime Bridge Trait
// =============================================================================

/// Translates diagnostic intents into runtime-specific commands.
///
/// # Implementations
///
/// - `DockerBridge`: docker-compatible runtimes (the `docker` CLI)
pub trait RuntimeBridge: Send + Sync {
    /// Returns the runtime name this bridge handles (e.g. `"docker"`).
    fn name(&self) -> &str;

    /// True if tracing requires the target's host process id.
    fn needs_process_id(&self) -> bool;

    /// Builds the command that inspects `container_id`.
    fn build_inspect_command(&self, container_id: &str) -> RuntimeCommand;

    /// Parses the inspect command's output into a process id.
    ///
    /// # Errors
    ///
    /// `Error::ProcessIdParse` on malformed output.
    fn extract_process_id(&self, inspection: &str) -> Result<ProcessId>;

    /// Builds the diagnostic tracer command.
    fn build_trace_command(&self, request: &TraceRequest) -> RuntimeCommand;

    /// Builds the self-test command.
    fn build_self_test_command(&self) -> RuntimeCommand;

    /// Builds the command that removes tracer leftovers.
    fn build_cleanup_command(&self) -> RuntimeCommand;

    /// Image for the privileged container when none is configured.
    fn default_image(&self) -> &str;

    /// Runtime socket path when none is configured.
    fn default_socket_path(&self) -> &str;
}
