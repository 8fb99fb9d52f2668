//! modelgate HTTP server
//!
//! Starts an Axum web server that spreads chat completion requests across
//! weighted OpenAI-compatible endpoints.

use clap::Parser;
use modelgate::{
    cli::{self, Cli, Command},
    config::Config,
    handlers::{self, AppState},
    telemetry,
};
use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config { output }) => write_template(output.as_deref()),
        Some(Command::Check) => match cli::check_config(&cli.config) {
            Ok(report) => {
                print!("{}", report);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Configuration check failed: {}", e);
                ExitCode::FAILURE
            }
        },
        None => match serve(&cli.config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "modelgate exited with an error");
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}

fn write_template(output: Option<&str>) -> ExitCode {
    let template = cli::generate_config_template();
    match output {
        Some(path) => match std::fs::write(path, template) {
            Ok(()) => {
                eprintln!("Configuration template written to {}", path);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to write {}: {}", path, e);
                ExitCode::FAILURE
            }
        },
        None => {
            print!("{}", template);
            ExitCode::SUCCESS
        }
    }
}

async fn serve(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_file(config_path)?;

    telemetry::init(&config.observability.log_level);

    let host: IpAddr = config.server.host.parse().map_err(|e| {
        format!(
            "server.host '{}' is not a valid IP address: {}",
            config.server.host, e
        )
    })?;
    let addr = SocketAddr::from((host, config.server.port));

    let state = AppState::new(Arc::new(config))?;
    tracing::info!(
        endpoints = state.gateway().registry().endpoints().len(),
        models = state.gateway().registry().model_ids().len(),
        "Starting modelgate server on {}",
        addr
    );

    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);
    tracing::info!("Chat completions available at http://{}/v1/chat/completions", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
