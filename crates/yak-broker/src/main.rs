//! YAK broker binary.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use yak_broker::config::BrokerConfig;
use yak_broker::Broker;
use yak_common::coord::HttpCoordStore;

#[derive(Parser, Debug)]
#[command(
    name = "broker",
    about = "YAK broker - distributed append-only log service",
    version
)]
struct Cli {
    /// Unique broker id within the cluster
    #[arg(long, env = "YAK_BROKER_ID")]
    broker_id: u32,

    /// Port to serve the broker API on
    #[arg(short = 'p', long, env = "YAK_PORT")]
    port: u16,

    /// Bind address
    #[arg(long, env = "YAK_BIND_ADDR", default_value = "0.0.0.0")]
    bind_addr: String,

    /// Advertised address for peers and clients (defaults to the bind
    /// address, or 127.0.0.1 when binding all interfaces)
    #[arg(long, env = "YAK_ADVERTISED_ADDR")]
    advertised_addr: Option<String>,

    /// Coordination store host
    #[arg(long, env = "YAK_COORD_HOST")]
    coord_host: String,

    /// Coordination store port
    #[arg(long, env = "YAK_COORD_PORT")]
    coord_port: u16,

    /// Data directory for topic logs
    #[arg(short = 'd', long, env = "YAK_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    std::env::set_var("RUST_LOG", &cli.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let advertised = cli.advertised_addr.clone().unwrap_or_else(|| {
        if cli.bind_addr == "0.0.0.0" {
            "127.0.0.1".to_string()
        } else {
            cli.bind_addr.clone()
        }
    });

    let mut config = BrokerConfig::new(cli.broker_id, advertised, cli.port);
    config.data_dir = cli.data_dir.clone();

    let coord = Arc::new(HttpCoordStore::new(
        &cli.coord_host,
        cli.coord_port,
        config.request_timeout,
    )?);

    let listener = TcpListener::bind((cli.bind_addr.as_str(), cli.port)).await?;
    info!(
        broker_id = cli.broker_id,
        coord = format!("{}:{}", cli.coord_host, cli.coord_port),
        "starting YAK broker"
    );

    let broker = Broker::start(config, coord, listener).await?;

    tokio::signal::ctrl_c().await?;
    broker.shutdown().await;
    Ok(())
}
