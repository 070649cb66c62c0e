//! Parley server daemon.
//!
//! One process is one replica. Point every replica at the same `--replicas`
//! list (which must include its own replication endpoint) and they elect a
//! primary among themselves:
//!
//! ```bash
//! parley --server-id replica1 --replication-port 9001 --client-port 8081 \
//!        --data-dir ./data1 --replicas 127.0.0.1:9001,127.0.0.1:9002,127.0.0.1:9003
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use parley_dispatch::{Dispatcher, Presence};
use parley_replication::{Replicator, ReplicatorConfig};
use parley_server::Server;
use parley_store::Store;
use parley_types::ReplicaId;

/// Parley - a fault-tolerant replicated chat service.
#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Unique name for this replica, used in logs and STATUS output.
    #[arg(long)]
    server_id: String,

    /// Host to bind both listeners to.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port for peer replication traffic.
    #[arg(long)]
    replication_port: u16,

    /// Port for client connections.
    #[arg(long)]
    client_port: u16,

    /// Directory holding this replica's collection files.
    #[arg(long)]
    data_dir: String,

    /// Comma-separated replication endpoints of every replica, self included.
    #[arg(long, value_delimiter = ',', required = true)]
    replicas: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("parley=info".parse().expect("static directive parses")),
        )
        .init();

    let store = Store::open(&cli.data_dir)
        .with_context(|| format!("opening data directory {}", cli.data_dir))?;
    let presence = Arc::new(Presence::new());
    let dispatcher = Dispatcher::new(Arc::new(store), Arc::clone(&presence));

    let config = ReplicatorConfig {
        server_id: cli.server_id.clone(),
        bind_host: cli.host.clone(),
        replication_port: cli.replication_port,
        replicas: cli.replicas.iter().map(ReplicaId::new).collect(),
    };
    let replicator = Replicator::new(config, dispatcher).context("invalid replica configuration")?;
    replicator.start().context("starting replication coordinator")?;

    let client_addr = format!("{}:{}", cli.host, cli.client_port);
    let server = Server::new(client_addr, Arc::clone(&replicator), presence);
    server.start().context("starting client listener")?;

    tracing::info!(server = %cli.server_id, "parley up");
    wait_for_shutdown()?;

    tracing::info!(server = %cli.server_id, "shutting down");
    server.stop();
    replicator.stop();
    Ok(())
}

/// Blocks until SIGINT or SIGTERM.
#[cfg(unix)]
fn wait_for_shutdown() -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("installing signal handlers")?;
    let signal = signals.forever().next();
    tracing::info!(signal = ?signal, "signal received");
    Ok(())
}

#[cfg(not(unix))]
fn wait_for_shutdown() -> Result<()> {
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
