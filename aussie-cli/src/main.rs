use clap::{Parser, Subcommand};
use colored::Colorize;

mod client;
mod commands;

use client::AdminClient;
use commands::lockouts::LockoutsCommands;
use commands::revocations::RevocationsCommands;
use commands::services::ServicesCommands;
use commands::translations::TranslationsCommands;

/// aussie - administrative CLI for the Aussie API gateway
#[derive(Parser)]
#[command(name = "aussie")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Base URL of the gateway's admin plane
    #[arg(long, env = "AUSSIE_SERVER", default_value = "http://localhost:8080", global = true)]
    server: String,

    /// Bearer token for the admin plane, if it requires one
    #[arg(long, env = "AUSSIE_ADMIN_TOKEN", global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage registered upstream services
    Services {
        #[command(subcommand)]
        command: ServicesCommands,
    },
    /// Revoke issued tokens
    Revocations {
        #[command(subcommand)]
        command: RevocationsCommands,
    },
    /// Manage token-translation schema versions
    Translations {
        #[command(subcommand)]
        command: TranslationsCommands,
    },
    /// Inspect and clear auth rate-limit lockouts
    Lockouts {
        #[command(subcommand)]
        command: LockoutsCommands,
    },
    /// Show pipeline outcome counters
    Metrics,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let admin = AdminClient::new(cli.server, cli.token);

    let result = match cli.command {
        Commands::Services { command } => commands::services::execute(&admin, command).await,
        Commands::Revocations { command } => commands::revocations::execute(&admin, command).await,
        Commands::Translations { command } => commands::translations::execute(&admin, command).await,
        Commands::Lockouts { command } => commands::lockouts::execute(&admin, command).await,
        Commands::Metrics => commands::metrics::execute(&admin).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        for cause in e.chain().skip(1) {
            eprintln!("{} {}", "Caused by:".yellow(), cause);
        }
        std::process::exit(1);
    }
}
