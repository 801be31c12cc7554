//! CLI command definitions.

use clap::Subcommand;
use cloudport_core::CloudProvider;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve and validate credentials for a provider
    Credentials {
        /// aws, gcp, azure or cloudflare
        provider: CloudProvider,

        /// Deploy file supplying the credential source (environment when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Push the local image to every target registry
    Push {
        /// Deploy file
        #[arg(short, long, default_value = "cloudport.yaml")]
        config: PathBuf,
    },

    /// Inspect the deploy file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the parsed deploy file with secrets masked
    Show {
        #[arg(short, long, default_value = "cloudport.yaml")]
        config: PathBuf,
    },
}
