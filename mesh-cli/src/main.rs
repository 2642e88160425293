//! `mesh-cli`: local-dev entry point. Wires a dev broker, a gateway
//! WebSocket transport, and the control plane into one process and serves
//! them over a single axum listener.
//!
//! Grounded on `cli/src/main.rs`'s clap `Args`/`Command` shape and
//! `serve::run_serve`'s listener-plus-router wiring, retargeted from one
//! agent-run socket to a gateway app plus its control plane.

use std::sync::Arc;

use a2a_protocol::topics::Namespace;
use clap::{Parser, Subcommand};
use mesh_broker::DevBroker;
use mesh_control::{spawn_control_plane, AppRegistry, ControlPlaneService, DefaultAppFactory};
use mesh_gateway::{router, AllowAllAccessValidator, ConnectionRegistry, GatewayAppState, TaskContextManager};
use tokio::net::TcpListener;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_NAMESPACE: &str = "dev/";

#[derive(Parser, Debug)]
#[command(name = "mesh-cli")]
#[command(about = "Local-dev server for the agent mesh: gateway + control plane on an in-process broker")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway + control plane dev server.
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Listen address for the gateway's WebSocket route.
    #[arg(long, value_name = "ADDR")]
    addr: Option<String>,

    /// Topic namespace prefix (e.g. "acme/prod/"); defaults to "dev/".
    #[arg(long, value_name = "NS")]
    namespace: Option<String>,

    /// Identifier this gateway publishes control-plane responses under.
    #[arg(long, default_value = "mesh-cli-gateway")]
    gateway_id: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    mesh_config::load_and_apply("mesh-cli", None::<&std::path::Path>).ok();
    mesh_config::tracing_init::init_stderr();

    let Args { cmd } = Args::parse();
    match cmd {
        Command::Serve(args) => serve(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let namespace = Namespace::new(args.namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()))?;
    let broker: Arc<dyn mesh_broker::BrokerClient> = Arc::new(DevBroker::new());

    let control_service = Arc::new(ControlPlaneService {
        namespace: namespace.clone(),
        apps: Arc::new(AppRegistry::new()),
        factory: Arc::new(DefaultAppFactory),
        broker: broker.clone(),
        nack_backoff: std::time::Duration::from_millis(200),
    });
    spawn_control_plane(control_service, 256).await?;

    let gateway_state = Arc::new(GatewayAppState {
        namespace,
        gateway_id: args.gateway_id,
        broker,
        context_manager: Arc::new(TaskContextManager::new()),
        access_validator: Arc::new(AllowAllAccessValidator),
        connections: Arc::new(ConnectionRegistry::new()),
    });

    let addr = args.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "mesh-cli: serving gateway + control plane");
    axum::serve(listener, router(gateway_state)).await?;
    Ok(())
}
