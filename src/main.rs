use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use beacon_router::{Config, Daemon, RoutingRequest};

/// Beacon Router - one entry point in front of many agent services
#[derive(Parser)]
#[command(name = "beacon-router", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/omni/router/config.toml when present)
    #[arg(short, long, env = "ROUTER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and ROUTER_PORT)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Discover services and serve the HTTP API (default)
    Serve,
    /// Run one discovery pass and print the report
    Discover,
    /// Discover services, route a single query and print the response
    Route {
        /// Free-text request
        query: String,
        /// Call these services directly instead of consulting the oracle
        #[arg(short, long = "target")]
        targets: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,beacon_router=info",
        1 => "info,beacon_router=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.api_server.port = port;
    }
    let port = config.api_server.port;
    let daemon = Daemon::new(config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            tracing::info!(port, "starting beacon router");
            daemon.run().await?;
        }
        Command::Discover => {
            let report = daemon.discover().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Route { query, targets } => {
            daemon.discover().await;

            let mut request = RoutingRequest::new(query);
            if !targets.is_empty() {
                request = request.with_targets(targets);
            }

            let response = daemon.dispatcher().route(request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}
