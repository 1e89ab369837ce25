mod backoff;
mod channel;
mod config;
mod error;
mod host;
mod protocol;
mod sandbox;

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::channel::socket;
use crate::config::{ChannelMode, Config};
use crate::sandbox::builtin::register_configured;
use crate::sandbox::env::EnvironmentBuilder;
use crate::sandbox::interp::Value;
use crate::sandbox::state::SharedState;
use crate::sandbox::Sandbox;

fn print_help() {
    println!(
        "\
sandpipe v{}

A sandboxed code execution channel over a duplex message pipe.

USAGE:
    sandpipe [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/sandpipe.toml]

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG    Log level filter for tracing
                (e.g. debug, sandpipe=debug,warn)

MODES (selected in the config file):
    serve      Run the sandbox side: listen for connections and evaluate
               incoming code fragments against the configured capabilities.
    connect    Run the host side: dispatch fragments typed on stdin and
               print each correlated result or error.

EXAMPLES:
    sandpipe                          # uses config/sandpipe.toml
    sandpipe /etc/sandpipe/host.toml  # custom config path
    RUST_LOG=debug sandpipe           # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("sandpipe v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sandpipe=info")),
        )
        .init();

    println!(
        r#"
                         _       _
   ___  __ _ _ __   __| |_ __ (_)_ __   ___
  / __|/ _` | '_ \ / _` | '_ \| | '_ \ / _ \
  \__ \ (_| | | | | (_| | |_) | | |_) |  __/
  |___/\__,_|_| |_|\__,_| .__/|_| .__/ \___|
                        |_|     |_|   v{}
"#,
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/sandpipe.toml".to_string());

    info!("Loading configuration from {config_path}");
    let config = Config::load(&config_path)?;

    info!("Channel mode: {}", config.channel.mode_description());

    match config.channel.mode.clone() {
        ChannelMode::Serve => serve(config).await,
        ChannelMode::Connect {
            request_timeout_secs,
        } => host::repl::run(&config.channel, request_timeout_secs).await,
    }
}

/// Sandbox side: one immutable environment, one listener, one serve
/// loop per accepted connection.
async fn serve(config: Config) -> Result<()> {
    let state = Arc::new(SharedState::new());
    let env = register_configured(EnvironmentBuilder::new(state), &config.capabilities)
        .constant("pi", Value::Float(std::f64::consts::PI))
        .build();

    info!("Capabilities: {}", env.names().join(", "));
    info!("Fragment size limit: {} bytes", config.limits.max_code_bytes);

    let sandbox = Sandbox::new(Arc::new(env), config.limits.clone());
    let listener = socket::listen(&config.channel.host, config.channel.port).await?;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        info!("Host connected from {peer}");
                        let (events, handle) = socket::spawn_io(stream);
                        let sandbox = sandbox.clone();
                        tokio::spawn(async move {
                            sandbox.serve(events, handle).await;
                            info!("Host {peer} disconnected");
                        });
                    }
                    Err(e) => error!("Accept failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, exiting");
                return Ok(());
            }
        }
    }
}
