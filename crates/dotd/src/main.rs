//! dotd - the docker-on-top volume plugin daemon.
//!
//! Serves the docker volume plugin protocol on a unix socket, backed by
//! the overlayfs volume driver in the `dot` crate.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::UnixListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dot::{Driver, KernelMounter};
use dot_common::DotPaths;

mod api;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Unix socket the docker daemon discovers the plugin on
    #[arg(
        long,
        env = "DOT_SOCKET",
        default_value = "/run/docker/plugins/docker-on-top.sock"
    )]
    socket: PathBuf,

    /// Directory holding every volume's state
    #[arg(long, env = "DOT_ROOT", default_value = "/var/lib/docker-on-top")]
    data_root: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Reconciles every discovered volume subtree before any request is
    // accepted
    let driver = Driver::new(DotPaths::with_root(&args.data_root), Box::new(KernelMounter))?;

    // An abrupt previous termination leaves the socket file behind, and
    // bind refuses to reuse it
    if args.socket.exists() {
        tracing::warn!(socket = %args.socket.display(), "Removing stale socket file");
        std::fs::remove_file(&args.socket)?;
    }
    if let Some(parent) = args.socket.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(&args.socket)?;
    tracing::info!(
        socket = %args.socket.display(),
        data_root = %args.data_root.display(),
        "docker-on-top listening"
    );

    axum::serve(listener, api::server::app(Arc::new(driver))).await?;
    Ok(())
}
