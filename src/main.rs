//! devconsoled: binds the ingestion HTTP surface and serves it until a
//! shutdown signal arrives.

use anyhow::{Context, Result};
use clap::Parser;
use devconsoled::config::Config;
use devconsoled::{http, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "devconsoled")]
#[command(about = "Local developer-console backend for browser telemetry")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to a TOML config file. Missing file is not an error.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the data directory (logs, sessions, screenshots).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Shrink all buffer capacities ("minimal mode").
    #[arg(long)]
    minimal: bool,

    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Serve JSON-RPC over stdin/stdout instead of binding an HTTP listener.
    #[arg(long)]
    stdio: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    // Stdio mode uses stdout for JSON-RPC responses, so logs must go to
    // stderr instead of interleaving with the protocol stream.
    if cli.stdio {
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt().with_max_level(level).init();
    }

    if let Err(e) = run(cli).await {
        error!(error = %e, "devconsoled exited with an error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }
    if cli.minimal {
        config.server.minimal_mode = true;
    }

    std::fs::create_dir_all(&config.storage.data_dir)
        .with_context(|| format!("creating data dir {:?}", config.storage.data_dir))?;
    std::fs::create_dir_all(&config.storage.screenshots_dir)
        .with_context(|| format!("creating screenshots dir {:?}", config.storage.screenshots_dir))?;

    let state = AppState::new(config.clone());

    if cli.stdio {
        info!("devconsoled serving JSON-RPC over stdio");
        devconsoled::rpc::stdio::run(state.clone())
            .await
            .context("stdio loop")?;
        state.shutdown().await;
        return Ok(());
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("parsing listen address")?;

    let router = http::router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "devconsoled listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server loop")?;

    state.shutdown().await;
    info!("devconsoled shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
