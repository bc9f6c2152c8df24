//! RelayKV - A Two-Thread In-Memory Key-Value Server
//!
//! This is the main entry point for the RelayKV server.
//! It parses the command line, loads the snapshot, starts the server threads
//! and stops them on Ctrl+C.

use clap::Parser;
use relaykv::config::{Role, ServerConfig, DEFAULT_BUFFER_SIZE};
use relaykv::server::Server;
use relaykv::storage::{snapshot, StorageEngine};
use relaykv::{DEFAULT_HOST, DEFAULT_PORT};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "relaykv", version, about = "RelayKV - in-memory key-value server")]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory holding the snapshot file
    #[arg(long, value_name = "PATH", default_value = "")]
    dir: String,

    /// Snapshot file name inside --dir
    #[arg(long, value_name = "FILE", default_value = "")]
    dbfilename: String,

    /// Run as a replica of "<host> <port>"
    #[arg(long, value_name = "HOST PORT", value_parser = parse_replicaof)]
    replicaof: Option<(String, u16)>,

    /// Receive/send buffer size per connection, in bytes
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,
}

fn parse_replicaof(s: &str) -> Result<(String, u16), String> {
    let mut parts = s.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(host), Some(port), None) => port
            .parse()
            .map(|port| (host.to_string(), port))
            .map_err(|_| format!("invalid port in '{s}'")),
        _ => Err(format!("expected \"<host> <port>\", got '{s}'")),
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            dir: args.dir,
            dbfilename: args.dbfilename,
            role: if args.replicaof.is_some() {
                Role::Slave
            } else {
                Role::Master
            },
            buffer_size: args.buffer_size,
        }
    }
}

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
  ____      _             _  ____     __
 |  _ \ ___| | __ _ _   _| |/ /\ \   / /
 | |_) / _ \ |/ _` | | | | ' /  \ \ / /
 |  _ <  __/ | (_| | |_| | . \   \ V /
 |_| \_\___|_|\__,_|\__, |_|\_\   \_/
                    |___/

RelayKV v{} - In-Memory Key-Value Server
──────────────────────────────────────────────────────────────
Binding to {} as {}

Use Ctrl+C to shutdown gracefully.
"#,
        relaykv::VERSION,
        config.bind_address(),
        config.role,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaykv=info".into()),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    if let Some((host, port)) = &args.replicaof {
        info!(master = %format!("{host}:{port}"), "Configured as replica");
    }
    let config = ServerConfig::from(args);

    print_banner(&config);

    let mut store = StorageEngine::new();
    if let Some(path) = config.snapshot_path() {
        snapshot::load(&path, &mut store)?;
    }

    let server = Server::bind(config, store)?;
    let shutdown = server.shutdown_handle();

    // The server loops never await, so they get a blocking thread of their own.
    let mut running = tokio::task::spawn_blocking(move || server.run());

    tokio::select! {
        result = &mut running => {
            result??;
            warn!("Server stopped without a shutdown signal");
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping server...");
            shutdown.stop();
            running.await??;
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
