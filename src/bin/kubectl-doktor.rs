//! kubectl-doktor - trace a running container from a privileged pod
//!
//! Installed on `PATH`, it runs as a kubectl plugin.
//!
//! ## Usage
//!
//! ```sh
//! kubectl doktor <pod> [-n namespace] [-c container] [-f filter] -p
//! kubectl doktor <pod> -p --pod-creation-timeout 2m --socket /run/docker.sock
//! kubectl doktor <pod> -p --self-test
//! ```
//!
//! Flags fall back to the `KUBECTL_PLUGINS_*` environment variables kubectl
//! sets for plugins. Trace output goes to stdout, logs to stderr.
//!
//! Ctrl-C stops the trace; the privileged pod is still removed.

use clap::Parser;
use doktor::{
    ClusterApiGateway, Error, KubectlGateway, Result, RuntimeBridgeFactory, SessionConfig,
    TargetDescriptor, TracerSession, UploadSpec, logging,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "kubectl-doktor",
    version,
    about = "Trace a running container from a privileged pod on its node"
)]
struct Args {
    /// Target pod name.
    pod: String,

    /// Namespace of the target pod (defaults to the context's namespace).
    #[arg(short = 'n', long, env = "KUBECTL_PLUGINS_CURRENT_NAMESPACE")]
    namespace: Option<String>,

    /// Target container (defaults to the pod's first container).
    #[arg(short = 'c', long, env = "KUBECTL_PLUGINS_LOCAL_FLAG_CONTAINER")]
    container: Option<String>,

    /// bpftrace filter program.
    #[arg(
        short = 'f',
        long,
        env = "KUBECTL_PLUGINS_LOCAL_FLAG_FILTER",
        default_value = ""
    )]
    filter: String,

    /// Include debug information in the logs.
    #[arg(short = 'v', long, env = "KUBECTL_PLUGINS_LOCAL_FLAG_VERBOSE")]
    verbose: bool,

    /// Deploy a privileged pod attached to the host namespaces.
    #[arg(short = 'p', long, env = "KUBECTL_PLUGINS_LOCAL_FLAG_PRIVILEGED")]
    privileged: bool,

    /// How long to wait for the privileged pod (e.g. 20s, 2m, 1h; 0 waits
    /// forever).
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1m")]
    pod_creation_timeout: Duration,

    /// Privileged container image.
    #[arg(long, env = "KUBECTL_PLUGINS_LOCAL_FLAG_IMAGE")]
    image: Option<String>,

    /// kubectl context to work on.
    #[arg(short = 'x', long, env = "KUBECTL_PLUGINS_CURRENT_CONTEXT")]
    context: Option<String>,

    /// Container runtime socket path on the node.
    #[arg(long, env = "KUBECTL_PLUGINS_SOCKET_PATH")]
    socket: Option<String>,

    /// Place a local file in the privileged container (`<local>:<remote>`).
    #[arg(long = "upload", value_parser = UploadSpec::parse)]
    uploads: Vec<UploadSpec>,

    /// Check the runtime client inside the privileged pod instead of tracing.
    #[arg(long)]
    self_test: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init_logging(args.verbose);

    if args.verbose {
        tracing::info!("running in verbose mode");
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "kubectl-doktor failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let context = KubectlGateway::new()
        .resolve_context(args.context.as_deref())
        .await?;
    let gateway = KubectlGateway::new().with_context(context);

    let namespace = match args.namespace.filter(|ns| !ns.is_empty()) {
        Some(namespace) => namespace,
        None => gateway.current_namespace().await?,
    };

    let target =
        TargetDescriptor::resolve(&gateway, &namespace, &args.pod, args.container.as_deref())
            .await?;

    tracing::info!(
        pod = %target.pod_name,
        container = %target.container_name,
        node = %target.node_name,
        runtime = %target.runtime_kind,
        "target resolved"
    );

    if !args.privileged {
        return Err(Error::InvalidInput(
            "tracing method not yet implemented, run with --privileged".to_string(),
        ));
    }

    let factory = RuntimeBridgeFactory::default();
    let bridge = factory.create_with_socket_path(&target.runtime_kind, args.socket.as_deref())?;

    let mut config = SessionConfig::default()
        .with_filter(args.filter)
        .with_pod_creation_timeout(args.pod_creation_timeout);
    if let Some(image) = args.image {
        config = config.with_image(image);
    }
    if let Some(socket) = args.socket {
        config = config.with_socket_path(socket);
    }
    for upload in args.uploads {
        config = config.with_upload(upload);
    }

    let gateway: Arc<dyn ClusterApiGateway> = Arc::new(gateway);
    let mut session = TracerSession::new(
        target,
        config,
        gateway,
        bridge,
        factory.supported().clone(),
    );

    let self_test = args.self_test;
    let finished = {
        let mut stdout = tokio::io::stdout();
        let scoped = async {
            if self_test {
                session.run_self_test(&mut stdout).await
            } else {
                session.run(&mut stdout).await
            }
        };

        tokio::select! {
            result = scoped => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        }
    };

    match finished {
        Some(result) => result,
        None => {
            tracing::info!("interrupted, starting tracer cleanup");
            if !session.needs_cleanup() {
                return Ok(());
            }
            session.cleanup().await.inspect_err(|_| {
                tracing::error!("failed to teardown tracer, a manual teardown is required");
            })
        }
    }
}
