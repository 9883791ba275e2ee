// ABOUTME: CLI entry point for running a standalone pub/sub broker

use argh::FromArgs;
use pubsub::{BrokerConfig, Listener};
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Run a localhost publish/subscribe broker
#[derive(FromArgs)]
struct CliArgs {
    /// first port to try binding (default: 7878)
    #[argh(option, short = 'p', default = "7878")]
    port: u16,

    /// whether to enable debug-level logging
    #[argh(switch, short = 'd')]
    debugging: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli_args: CliArgs = argh::from_env();

    let level = if cli_args.debugging {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");

    let config = BrokerConfig::default().with_base_port(cli_args.port);
    let listener = match Listener::bind(&config).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%err, "failed to bind broker listener");
            return ExitCode::FAILURE;
        }
    };

    let shutdown_handle = listener.shutdown_handle();
    println!("{}", listener.local_port());
    info!(port = listener.local_port(), "broker listening");

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, shutting down");
            shutdown_handle.shutdown();
        }
    });

    match listener.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "broker exited with error");
            ExitCode::FAILURE
        }
    }
}
