//! lockd: serves a lock store over HTTP so several faucet processes share one
//! set of locks.

use clap::Parser;
use drip_common::{init_logging, shutdown_signal, LogFormat, LoggingConfig};
use drip_lockstore::{lock_router, LockStore, MemoryLockStore, SledLockStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Lock server CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "LOCKD_LISTEN", default_value = "127.0.0.1:7070")]
    listen: String,

    /// sled database directory; locks are kept in memory when absent
    #[arg(long, env = "LOCKD_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Log format (compact, pretty, json)
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let logging = LoggingConfig {
        format: args.log_format,
        ..Default::default()
    }
    .debug(args.debug);
    init_logging(&logging)?;

    let store: Arc<dyn LockStore> = match &args.db_path {
        Some(path) => {
            info!("Opening lock database at {}", path.display());
            Arc::new(SledLockStore::open(path)?)
        }
        None => {
            warn!("No --db-path given; locks live in memory and vanish on restart");
            Arc::new(MemoryLockStore::new())
        }
    };

    let addr: SocketAddr = args.listen.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Lock server listening on {}", addr);

    axum::serve(listener, lock_router(store))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down gracefully");
    Ok(())
}
