//! srrs - Soccer robot remote server
//!
//! Keeps a connection to TRC and relays its robot state.

mod config;

use clap::Parser;
use config::Config;
use srrs_protocol::State;
use srrs_trc::{Conn, Pool, TrcError};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "srrs")]
#[command(about = "Relays robot state and commands between TRC and its clients")]
#[command(version)]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, env = "SRRS_CONFIG")]
    config: Option<PathBuf>,

    /// Unix socket TRC listens on
    #[arg(long)]
    unix_socket: Option<PathBuf>,

    /// TCP address of TRC (used instead of the Unix socket)
    #[arg(long)]
    tcp_socket: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(path) = cli.unix_socket {
        config.trc.unix_socket = path;
    }
    if let Some(addr) = cli.tcp_socket {
        config.trc.tcp_socket = Some(addr);
    }
    if cli.debug {
        config.logging.debug = true;
    }

    let default_filter = if config.logging.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let endpoint = config.trc.endpoint();
    tracing::info!("Starting srrs");
    tracing::info!("  TRC endpoint: {}", endpoint);
    tracing::info!("  Protocol version: {}", config.trc.protocol_version);
    tracing::info!("  Ping interval: {:?}", config.trc.ping_interval());

    let pool = Pool::for_endpoint(
        config.trc.pool_config(),
        endpoint,
        config.trc.protocol_version,
    );

    tokio::select! {
        _ = relay(&pool, config.trc.retry_interval()) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping...");
        }
    }

    if let Err(e) = pool.close().await {
        tracing::error!("Failed to close TRC connection: {}", e);
    }
    tracing::info!("srrs stopped");
    Ok(())
}

/// Follows TRC state across reconnects.
async fn relay(pool: &Pool, retry_interval: Duration) {
    loop {
        match pool.get().await {
            Ok(conn) => {
                if let Err(e) = watch_state(&conn).await {
                    tracing::warn!(error = %e, "Stopped watching TRC state");
                }
            }
            Err(e) => tracing::warn!(error = %e, "TRC unavailable"),
        }
        tokio::time::sleep(retry_interval).await;
    }
}

async fn watch_state(conn: &Conn) -> Result<(), TrcError> {
    tracing::info!(
        version = %conn.version(),
        token = conn.token().is_ok(),
        "Connected to TRC"
    );

    let mut changes = conn.subscribe_state_changes()?;
    log_state(&conn.state());
    while changes.changed().await {
        log_state(&conn.state());
    }

    tracing::info!("TRC connection closed");
    Ok(())
}

fn log_state(state: &State) {
    let turtles = state.turtles.as_ref();
    tracing::info!(
        command = ?state.command,
        turtles = turtles.map_or(0, |t| t.len()),
        "TRC state"
    );
    for (id, turtle) in turtles.into_iter().flatten() {
        tracing::debug!(
            turtle = %id,
            battery = turtle.battery_voltage,
            emergency = turtle.emergency_status,
            role = ?turtle.role,
            in_field = turtle.robot_in_field,
            "Turtle state"
        );
    }
}
