//! Shared in-memory gateway for integration tests.
//!
//! `MockGateway` serves one target pod and one privileged pod, records every
//! call, and lets each test script the responses it cares about.

#![allow(dead_code)]

use async_trait::async_trait;
use doktor::{
    ClusterApiGateway, ContainerInfo, Error, NodeInfo, OutputSink, PodInstance, PodPhase, PodRef,
    PrivilegedPodSpec, Result, TargetDescriptor,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

// =============================================================================
// Fixtures
// =============================================================================

pub const TARGET_NAMESPACE: &str = "shop";
pub const TARGET_POD: &str = "web-7d4b9";
pub const TARGET_CONTAINER: &str = "app";
pub const SIDECAR_CONTAINER: &str = "sidecar";
pub const TARGET_CONTAINER_ID: &str = "0123abcd";
pub const NODE_NAME: &str = "worker-1";
pub const PRIVILEGED_POD: &str = "doktor-x7k2q";
pub const TARGET_PID: u32 = 4242;

/// The target pod as the cluster reports it.
pub fn target_pod() -> PodInstance {
    PodInstance {
        pod: PodRef::new(TARGET_NAMESPACE, TARGET_POD),
        node_name: Some(NODE_NAME.to_string()),
        phase: PodPhase::Running,
        containers: vec![
            ContainerInfo {
                name: TARGET_CONTAINER.to_string(),
                container_id: Some(format!("docker://{TARGET_CONTAINER_ID}")),
            },
            ContainerInfo {
                name: SIDECAR_CONTAINER.to_string(),
                container_id: Some("docker://ffff0000".to_string()),
            },
        ],
        created_at: None,
    }
}

/// The resolved target descriptor for [`target_pod`].
pub fn target() -> TargetDescriptor {
    TargetDescriptor::from_pod(&target_pod(), Some(TARGET_CONTAINER)).unwrap()
}

/// Reference to the privileged pod the mock hands out.
pub fn privileged_pod() -> PodRef {
    PodRef::new(TARGET_NAMESPACE, PRIVILEGED_POD)
}

// =============================================================================
// Scripted Behavior
// =============================================================================

/// Response to an `execute` call.
#[derive(Debug, Clone)]
pub enum ExecResponse {
    /// Command ran: write `stdout` to the sink and exit with `code`.
    Exit { code: i32, stdout: String },
    /// Transport failure; the command's outcome is unknown.
    TransportError,
}

impl ExecResponse {
    pub fn ok(stdout: &str) -> Self {
        Self::Exit {
            code: 0,
            stdout: stdout.to_string(),
        }
    }

    pub fn exit(code: i32) -> Self {
        Self::Exit {
            code,
            stdout: String::new(),
        }
    }
}

/// Behavior of `upload_file`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadBehavior {
    /// Exit 0 and the file appears remotely.
    Succeed,
    /// Exit 0 but the file never appears.
    SucceedWithoutFile,
    /// Exit with the given code.
    Exit(i32),
    /// Transport failure.
    TransportError,
}

/// A recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetNode(String),
    CreatePod,
    GetPod(String),
    DeletePod(String, String),
    Execute(Vec<String>),
    Upload(PathBuf, String),
}

struct MockState {
    node_runtime: String,
    /// `get_pod` calls for the privileged pod that report Pending first.
    pending_polls: u32,
    /// Leading `get_pod` calls for the privileged pod that fail outright.
    lookup_errors: u32,
    never_running: bool,
    exec_rules: Vec<(String, ExecResponse)>,
    remote_files: HashSet<String>,
    upload_behavior: UploadBehavior,
    delete_fails: bool,
    calls: Vec<Call>,
    created: Vec<PrivilegedPodSpec>,
    privileged_polls: u32,
}

/// Scriptable in-memory [`ClusterApiGateway`].
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    /// Docker node, privileged pod running on the first poll, every command
    /// exits 0, and inspect reports [`TARGET_PID`].
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                node_runtime: "docker://20.10.7".to_string(),
                pending_polls: 0,
                lookup_errors: 0,
                never_running: false,
                exec_rules: vec![(
                    " inspect ".to_string(),
                    ExecResponse::ok(&format!("{TARGET_PID}\n")),
                )],
                remote_files: HashSet::new(),
                upload_behavior: UploadBehavior::Succeed,
                delete_fails: false,
                calls: Vec::new(),
                created: Vec::new(),
                privileged_polls: 0,
            }),
        }
    }

    fn state_mut(&mut self) -> &mut MockState {
        self.state.get_mut().unwrap()
    }

    pub fn with_node_runtime(mut self, runtime: &str) -> Self {
        self.state_mut().node_runtime = runtime.to_string();
        self
    }

    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.state_mut().pending_polls = polls;
        self
    }

    pub fn with_lookup_errors(mut self, errors: u32) -> Self {
        self.state_mut().lookup_errors = errors;
        self
    }

    pub fn never_running(mut self) -> Self {
        self.state_mut().never_running = true;
        self
    }

    /// Scripts the response for any argv whose joined form contains
    /// `needle`. Later rules take precedence.
    pub fn with_exec_rule(mut self, needle: &str, response: ExecResponse) -> Self {
        self.state_mut()
            .exec_rules
            .insert(0, (needle.to_string(), response));
        self
    }

    pub fn with_remote_file(mut self, path: &str) -> Self {
        self.state_mut().remote_files.insert(path.to_string());
        self
    }

    pub fn with_upload_behavior(mut self, behavior: UploadBehavior) -> Self {
        self.state_mut().upload_behavior = behavior;
        self
    }

    pub fn failing_delete(mut self) -> Self {
        self.state_mut().delete_fails = true;
        self
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn created(&self) -> Vec<PrivilegedPodSpec> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<PodRef> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::DeletePod(ns, name) => Some(PodRef::new(ns, name)),
                _ => None,
            })
            .collect()
    }

    pub fn executed(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Execute(argv) => Some(argv),
                _ => None,
            })
            .collect()
    }

    pub fn upload_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Upload(..)))
            .count()
    }

    pub fn privileged_polls(&self) -> u32 {
        self.state.lock().unwrap().privileged_polls
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn respond(&self, argv: &[String]) -> ExecResponse {
        let state = self.state.lock().unwrap();
        let joined = format!(" {} ", argv.join(" "));

        if let Some((_, response)) = state
            .exec_rules
            .iter()
            .find(|(needle, _)| joined.contains(needle.as_str()))
        {
            return response.clone();
        }

        // Presence checks consult the remote file set.
        if let Some(script) = argv.get(2).filter(|_| argv[0] == "/bin/sh") {
            if let Some(path) = script.strip_prefix("test -f ") {
                let path = path.trim_matches('\'');
                let code = if state.remote_files.contains(path) { 0 } else { 1 };
                return ExecResponse::exit(code);
            }
        }

        ExecResponse::exit(0)
    }
}

#[async_trait]
impl ClusterApiGateway for MockGateway {
    async fn get_node(&self, name: &str) -> Result<NodeInfo> {
        self.record(Call::GetNode(name.to_string()));
        if name != NODE_NAME {
            return Err(Error::NodeNotFound(name.to_string()));
        }
        Ok(NodeInfo {
            name: name.to_string(),
            container_runtime_version: self.state.lock().unwrap().node_runtime.clone(),
        })
    }

    async fn create_pod(&self, spec: &PrivilegedPodSpec, _timeout: Duration) -> Result<PodInstance> {
        self.record(Call::CreatePod);
        self.state.lock().unwrap().created.push(spec.clone());
        Ok(PodInstance {
            pod: PodRef::new(spec.namespace.clone(), PRIVILEGED_POD),
            node_name: Some(spec.node_name.clone()),
            phase: PodPhase::Pending,
            containers: vec![ContainerInfo {
                name: spec.container_name.clone(),
                container_id: None,
            }],
            created_at: None,
        })
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodInstance> {
        self.record(Call::GetPod(name.to_string()));

        if namespace == TARGET_NAMESPACE && name == TARGET_POD {
            return Ok(target_pod());
        }
        if name != PRIVILEGED_POD {
            return Err(Error::PodNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }

        let mut state = self.state.lock().unwrap();
        state.privileged_polls += 1;

        if state.privileged_polls <= state.lookup_errors {
            return Err(Error::gateway("get pod", name, "connection refused"));
        }

        let running =
            !state.never_running && state.privileged_polls > state.pending_polls + state.lookup_errors;
        Ok(PodInstance {
            pod: PodRef::new(namespace, name),
            node_name: Some(NODE_NAME.to_string()),
            phase: if running {
                PodPhase::Running
            } else {
                PodPhase::Pending
            },
            containers: vec![ContainerInfo {
                name: "doktor-privileged".to_string(),
                container_id: running.then(|| "docker://9999".to_string()),
            }],
            created_at: None,
        })
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(Call::DeletePod(namespace.to_string(), name.to_string()));
        if self.state.lock().unwrap().delete_fails {
            return Err(Error::gateway("delete pod", name, "forbidden"));
        }
        Ok(())
    }

    async fn execute(
        &self,
        _pod: &PodRef,
        _container: &str,
        command: &[String],
        stdout: &mut OutputSink<'_>,
    ) -> Result<i32> {
        self.record(Call::Execute(command.to_vec()));

        match self.respond(command) {
            ExecResponse::Exit { code, stdout: out } => {
                stdout.write_all(out.as_bytes()).await?;
                Ok(code)
            }
            ExecResponse::TransportError => {
                Err(Error::gateway("exec", PRIVILEGED_POD, "stream reset"))
            }
        }
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        remote_path: &str,
        _pod: &PodRef,
        _container: &str,
    ) -> Result<i32> {
        self.record(Call::Upload(local_path.to_path_buf(), remote_path.to_string()));

        let mut state = self.state.lock().unwrap();
        match state.upload_behavior {
            UploadBehavior::Succeed => {
                state.remote_files.insert(remote_path.to_string());
                Ok(0)
            }
            UploadBehavior::SucceedWithoutFile => Ok(0),
            UploadBehavior::Exit(code) => Ok(code),
            UploadBehavior::TransportError => {
                Err(Error::gateway("upload", remote_path, "connection reset"))
            }
        }
    }
}
