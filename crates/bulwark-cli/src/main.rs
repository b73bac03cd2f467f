//! bulwark: run one bulwark-rootd request and print the response

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bulwark_cli::{render, run, Cli};
use bulwark_daemon::ClientError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // stdout carries only the response
    let default_filter = if cli.verbose {
        "bulwark_cli=debug,bulwark_agent=debug,bulwark_daemon=debug"
    } else {
        "bulwark_cli=warn,bulwark_agent=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(&cli).await {
        Ok(response) => {
            println!("{}", render(&response, cli.pretty));
            if response.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if let Some(ClientError::DaemonNotRunning(_)) = e.downcast_ref::<ClientError>() {
                eprintln!("Start it with: systemctl start bulwark-rootd");
            }
            ExitCode::from(2)
        }
    }
}
