//! Serve command - Run the HTTP gateway.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use hexsmith_server::GatewayServer;

#[derive(Args)]
pub struct ServeArgs {
    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Bind only to the loopback interface
    #[arg(long)]
    local: bool,
}

pub async fn execute(args: ServeArgs, project: Option<PathBuf>) -> Result<()> {
    let project_dir = super::project_dir(project)?;
    let pipeline = super::pipeline(project_dir)?;
    let port = args.port.unwrap_or(pipeline.settings().port);

    let host = if args.local { [127, 0, 0, 1] } else { [0, 0, 0, 0] };
    GatewayServer::new(Arc::new(pipeline))
        .addr(SocketAddr::from((host, port)))
        .start()
        .await
        .context("HTTP gateway stopped")
}
