//! mcrelay - Supervise game server consoles from one dashboard
//!
//! `mcrelay wrapper` runs next to a game server and exposes its console.
//! `mcrelay center` connects to every configured wrapper and serves the dashboard API.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mcrelay_api::{ApiServer, ApiServerConfig};
use mcrelay_connection::WebSocketDialer;
use mcrelay_control::ConnectionRegistry;
use mcrelay_status::RakNetProbe;
use mcrelay_wrapper::{ConsoleHub, ProcessRunner, RunnerConfig, WrapperServer, WrapperServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{parse_listen_addr, CenterConfig};

/// How long connection tasks get to wind down after the dashboard stops
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");

#[derive(Parser, Debug)]
#[command(name = "mcrelay")]
#[command(about = "Supervise game server consoles from one dashboard")]
#[command(version = VERSION)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to every configured wrapper and serve the dashboard API
    #[command(long_about = r#"
Connect to every wrapper listed in the config file and serve the dashboard
API and console relay. Lost wrapper connections are redialled with a linear
backoff; exhausted or rejected connections wait for POST /api/retry.

EXAMPLES:
  AUTH_KEY=dashboard-key mcrelay center --config /etc/mcrelay/config.json

ENVIRONMENT VARIABLES:
  CONFIG_FILE     Path to the JSON config file
  LISTEN_ADDRESS  Address for the dashboard API (e.g. :8081)
  AUTH_KEY        Key dashboard clients must present
    "#)]
    Center {
        /// Path to the JSON config file
        #[arg(long = "config", env = "CONFIG_FILE", default_value = "config.json")]
        config: PathBuf,

        /// Listen address; overrides listen_address from the config file
        #[arg(long, env = "LISTEN_ADDRESS")]
        listen: Option<String>,

        /// Dashboard key; overrides auth_key from the config file
        #[arg(long, env = "AUTH_KEY", hide_env_values = true)]
        auth_key: Option<String>,

        /// Allow browser requests from localhost origins
        #[arg(long)]
        cors: bool,
    },

    /// Run the game server and expose its console over WebSocket
    #[command(long_about = r#"
Start the game server as a child process and serve its console at /ws.
The last 1000 lines are replayed to each new client; every frame a client
sends is written to the server's stdin as one line. The wrapper exits when
the server process does.

EXAMPLES:
  AUTH_KEY=wrapper-key mcrelay wrapper --app-dir /srv/bedrock

ENVIRONMENT VARIABLES:
  LISTEN_ADDRESS  Address for the console endpoint (e.g. :8080)
  APP_DIR         Directory containing the server binary
  AUTH_KEY        Key the center (and any other client) must present
    "#)]
    Wrapper {
        /// Server executable
        #[arg(long, default_value = "./bedrock_server")]
        command: String,

        /// Arguments passed to the server executable
        #[arg(last = true)]
        args: Vec<String>,

        /// Listen address
        #[arg(long, env = "LISTEN_ADDRESS", default_value = ":8080")]
        listen: String,

        /// Working directory for the server process
        #[arg(long, env = "APP_DIR")]
        app_dir: Option<PathBuf>,

        /// Key clients must present
        #[arg(long, env = "AUTH_KEY", hide_env_values = true)]
        auth_key: String,
    },
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

async fn run_center(
    config_path: PathBuf,
    listen: Option<String>,
    auth_key: Option<String>,
    cors: bool,
) -> Result<()> {
    let config = CenterConfig::load(&config_path).context("Failed to load configuration")?;
    let auth_key = config.resolve_auth_key(auth_key.as_deref())?;
    let listen = listen.unwrap_or_else(|| config.listen_address.clone());
    let bind_addr = parse_listen_addr(&listen)?;

    let registry = Arc::new(ConnectionRegistry::new(
        Arc::new(WebSocketDialer::new()),
        config.timings(),
    ));

    let started = registry.connect_all(config.wrappers.iter().cloned());
    info!(
        "Connecting to {} of {} configured wrappers",
        started,
        config.wrappers.len()
    );

    let server = ApiServer::new(
        ApiServerConfig {
            bind_addr,
            auth_key,
            enable_cors: cors,
            default_status_port: config.default_status_port,
        },
        registry.clone(),
        Arc::new(RakNetProbe::default()),
    )
    .context("Failed to create API server")?;

    let result = server
        .start(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down...");
            }
        })
        .await;

    registry.shutdown(SHUTDOWN_GRACE).await;
    info!("Center stopped");

    result
}

async fn run_wrapper(
    command: String,
    args: Vec<String>,
    listen: String,
    app_dir: Option<PathBuf>,
    auth_key: String,
) -> Result<()> {
    let bind_addr = parse_listen_addr(&listen)?;

    let mut runner_config = RunnerConfig::new(command).with_args(args);
    if let Some(dir) = app_dir {
        runner_config = runner_config.with_work_dir(dir);
    }

    let (mut runner, output) =
        ProcessRunner::start(&runner_config).context("Failed to start server process")?;

    let hub = Arc::new(ConsoleHub::default());
    let pump = tokio::spawn({
        let hub = hub.clone();
        async move { hub.pump(output).await }
    });

    let server = WrapperServer::new(
        WrapperServerConfig {
            bind_addr,
            auth_key,
        },
        hub,
        runner.input(),
    )
    .context("Failed to create console server")?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server_task = tokio::spawn(server.start(async {
        let _ = stop_rx.await;
    }));

    let status = tokio::select! {
        status = runner.wait() => Some(status?),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping server process...");
            runner.kill().await?;
            None
        }
        result = &mut server_task => {
            runner.kill().await?;
            result.context("Console server task panicked")??;
            anyhow::bail!("Console server stopped unexpectedly");
        }
    };

    let _ = stop_tx.send(());
    match server_task.await {
        Ok(Err(e)) => warn!("Console server error: {:#}", e),
        Err(e) => warn!("Console server task failed: {}", e),
        Ok(Ok(())) => {}
    }
    pump.abort();

    match status {
        Some(status) if !status.success() => {
            anyhow::bail!("Server process exited with {}", status)
        }
        _ => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("mcrelay {}", VERSION);

    let result = match cli.command {
        Commands::Center {
            config,
            listen,
            auth_key,
            cors,
        } => run_center(config, listen, auth_key, cors).await,
        Commands::Wrapper {
            command,
            args,
            listen,
            app_dir,
            auth_key,
        } => run_wrapper(command, args, listen, app_dir, auth_key).await,
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_version_carries_commit_hash() {
        assert!(VERSION.starts_with(env!("CARGO_PKG_VERSION")));
        assert!(VERSION.ends_with(&format!("({})", env!("GIT_HASH"))));
        assert!(!env!("GIT_HASH").is_empty());
    }

    #[test]
    fn test_wrapper_defaults() {
        let cli = Cli::try_parse_from(["mcrelay", "wrapper", "--auth-key", "k"]).unwrap();
        match cli.command {
            Commands::Wrapper { command, args, .. } => {
                assert_eq!(command, "./bedrock_server");
                assert!(args.is_empty());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
