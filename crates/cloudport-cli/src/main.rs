//! Cloudport CLI entrypoint.

use clap::Parser;
use cloudport_core::CancellationToken;
use console::style;
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod handlers;

use commands::{Commands, ConfigCommands};

#[derive(Parser)]
#[command(name = "cloudport")]
#[command(author, version, about = "Push container images to cloud registries", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.json);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let result = match cli.command {
        Commands::Credentials { provider, config } => {
            handlers::credentials(&cancel, provider, config.as_deref()).await
        }
        Commands::Push { config } => handlers::push(&cancel, &config).await,
        Commands::Config { command } => match command {
            ConfigCommands::Show { config } => handlers::show_config(&config),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", style("✗").red());
            ExitCode::FAILURE
        }
    }
}
