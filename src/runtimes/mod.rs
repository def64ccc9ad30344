//! Runtime bridge implementations.
//!
//! Each bridge handles exactly one container runtime. The factory binds a
//! runtime name to a bridge and fails explicitly for anything it does not
//! know or that is not in the injected supported set.

pub mod docker;

pub use self::docker::DockerBridge;

use crate::error::{Error, Result};
use crate::runtime::{RuntimeBridge, SupportedRuntimes};

/// Builds runtime bridges by runtime name.
#[derive(Debug, Clone, Default)]
pub struct RuntimeBridgeFactory {
    supported: SupportedRuntimes,
}

impl RuntimeBridgeFactory {
    /// Creates a factory restricted to `supported`.
    pub fn new(supported: SupportedRuntimes) -> Self {
        Self { supported }
    }

    /// Returns the supported runtime set.
    pub fn supported(&self) -> &SupportedRuntimes {
        &self.supported
    }

    /// Builds the bridge for `runtime_name`.
    ///
    /// # Errors
    ///
    /// `Error::UnsupportedRuntime` when the name is not in the supported set
    /// or no bridge implementation exists for it.
    pub fn create(&self, runtime_name: &str) -> Result<Box<dyn RuntimeBridge>> {
        self.create_with_socket_path(runtime_name, None)
    }

    /// Builds the bridge for `runtime_name`, bound to a non-default runtime
    /// socket path when `socket_path` is given.
    ///
    /// # Errors
    ///
    /// Same as [`RuntimeBridgeFactory::create`].
    pub fn create_with_socket_path(
        &self,
        runtime_name: &str,
        socket_path: Option<&str>,
    ) -> Result<Box<dyn RuntimeBridge>> {
        let name = runtime_name.trim().to_ascii_lowercase();

        if !self.supported.contains(&name) {
            return Err(self.unsupported(runtime_name));
        }

        match name.as_str() {
            "docker" => {
                let bridge = DockerBridge::new();
                Ok(match socket_path {
                    Some(path) => Box::new(bridge.with_socket_path(path)),
                    None => Box::new(bridge),
                })
            }
            _ => Err(self.unsupported(runtime_name)),
        }
    }

    fn unsupported(&self, runtime_name: &str) -> Error {
        Error::UnsupportedRuntime {
            runtime: runtime_name.to_string(),
            node: None,
            supported: self.supported.names(),
        }
    }
}
