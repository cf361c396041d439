//! Gateway server: browser API in front of the orchestrator host.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use gateway::state::GatewayState;
use gateway::upstream::UpstreamClient;

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "Streaming gateway for the threat-model orchestrator")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Base URL of the orchestrator host
    #[arg(long, env = "ORCHESTRATOR_URL", default_value = "http://localhost:8005")]
    orchestrator_url: String,

    /// Directory holding rendered reports
    #[arg(long, default_value = "reports")]
    reports_dir: PathBuf,

    /// Directory containing UI static files
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gateway=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!(orchestrator_url = %args.orchestrator_url, "starting gateway");

    let upstream = UpstreamClient::new(&args.orchestrator_url)?;
    let state = GatewayState::new(upstream, args.reports_dir);
    let app = gateway::app(state, args.ui_dir);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .with_context(|| format!("parse bind address {}:{}", args.bind, args.port))?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
