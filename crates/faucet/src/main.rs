//! Faucet service binary

use anyhow::Context;
use clap::Parser;
use drip_common::{init_logging, shutdown_signal};
use drip_faucet::api::build_router;
use drip_faucet::{FaucetConfig, FaucetService};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Testnet token faucet
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path (toml, yaml or json)
    #[arg(short, long, env = "FAUCET_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to listen on
    #[arg(long)]
    ip: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Send tokens to this address once and exit
    #[arg(long, value_name = "ADDRESS")]
    send: Option<String>,

    /// Disable the per-IP rate limiter
    #[arg(long)]
    no_limit: bool,

    /// Accept claims without sending anything
    #[arg(long)]
    no_send: bool,

    /// Skip reCAPTCHA verification
    #[arg(long)]
    no_recaptcha: bool,

    /// Trust X-Forwarded-For / X-Real-IP from a reverse proxy
    #[arg(long)]
    behind_proxy: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = FaucetConfig::load(args.config.as_deref())?;
    apply_args(&mut config, &args)?;

    init_logging(&config.logging)?;
    info!("Starting faucet v{}", env!("CARGO_PKG_VERSION"));
    debug!("Configuration: {:?}", config);

    if let Some(address) = &args.send {
        let service = FaucetService::initialize(config).await?;
        return match service.send_once(address).await {
            Ok(receipt) => {
                info!("Sent to {}: hash={} height={}", address, receipt.hash, receipt.height);
                Ok(())
            }
            Err(e) => {
                error!("Send to {} failed: {}", address, e);
                Err(e.into())
            }
        };
    }

    let addr: SocketAddr = config
        .server_addr
        .parse()
        .with_context(|| format!("invalid server_addr {}", config.server_addr))?;
    let service = Arc::new(FaucetService::initialize(config).await?);
    let app = build_router(service.clone());

    info!(network = %service.network_id(), "Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down gracefully");
    Ok(())
}

fn apply_args(config: &mut FaucetConfig, args: &Args) -> anyhow::Result<()> {
    if args.ip.is_some() || args.port.is_some() {
        let mut addr: SocketAddr = config
            .server_addr
            .parse()
            .with_context(|| format!("invalid server_addr {}", config.server_addr))?;
        if let Some(ip) = args.ip {
            addr.set_ip(ip);
        }
        if let Some(port) = args.port {
            addr.set_port(port);
        }
        config.server_addr = addr.to_string();
    }

    config.disable_limiter |= args.no_limit;
    config.disable_send |= args.no_send;
    config.disable_captcha |= args.no_recaptcha;
    config.trust_forwarded_headers |= args.behind_proxy;
    config.logging = config.logging.clone().debug(args.debug);
    Ok(())
}
