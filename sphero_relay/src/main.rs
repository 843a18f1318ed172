// CLI entry point for the Sphero relay.
//
// Starts a standalone relay that Sphero controllers, the decision process
// and the camera pipeline connect to over websockets. Configuration comes
// from defaults, then an optional TOML file (`--config`), then the flags
// below. See `server.rs` for the networking architecture and `session.rs`
// for the relay state.
//
// Usage:
//   relay [OPTIONS]
//     --config <FILE>               TOML config file
//     --bind <ADDR>                 Listen address (default: 0.0.0.0)
//     --port <PORT>                 Listen port (default: 8080)
//     --upstream <URL>              Processing server for camera frames
//     --mode <face|scan>            Use the default face or scan server URL
//     --broadcast-interval-ms <N>   Stimulus interval (default: 10000)
//     --no-broadcast                Disable the periodic stimulus
//     --verbose                     Debug logging

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use sphero_relay::config::{RelayConfig, UpstreamMode};
use sphero_relay::start_relay;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Role-aware websocket relay for a Sphero swarm
#[derive(Parser)]
#[command(name = "relay", version, about)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Websocket URL camera frames are forwarded to
    #[arg(long, conflicts_with = "mode")]
    upstream: Option<String>,

    /// Forward camera frames to the default face or scan server
    #[arg(long, value_enum)]
    mode: Option<UpstreamMode>,

    /// Interval between stimulus broadcasts to the units
    #[arg(long)]
    broadcast_interval_ms: Option<u64>,

    /// Do not send the periodic stimulus
    #[arg(long)]
    no_broadcast: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Layer the flags over a loaded (or default) config.
    fn apply(self, mut config: RelayConfig) -> RelayConfig {
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(url) = self.upstream {
            config.upstream.url = Some(url);
        } else if let Some(mode) = self.mode {
            config.upstream.url = Some(mode.default_url().to_owned());
        }
        if let Some(interval) = self.broadcast_interval_ms {
            config.broadcast.interval_ms = interval;
        }
        if self.no_broadcast {
            config.broadcast.enabled = false;
        }
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "sphero_relay=debug"
    } else {
        "sphero_relay=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => match RelayConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => RelayConfig::default(),
    };
    let config = cli.apply(config);

    let (handle, addr) = match start_relay(config) {
        Ok(result) => result,
        Err(e) => {
            error!("failed to start relay: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("relay v{} ready on ws://{addr}", env!("CARGO_PKG_VERSION"));

    // The process exits on SIGINT/SIGTERM; the relay threads go with it.
    handle.wait();
    ExitCode::SUCCESS
}
