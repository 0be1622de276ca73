use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use serde_json::Value;

use crate::client::AdminClient;

#[derive(Subcommand)]
pub enum LockoutsCommands {
    /// Look up an active lockout by its raw key, e.g. `ip:203.0.113.4`
    Get {
        #[arg(value_name = "KEY")]
        key: String,
    },

    /// Clear an active lockout by its raw key
    Clear {
        #[arg(value_name = "KEY")]
        key: String,
    },
}

pub async fn execute(client: &AdminClient, command: LockoutsCommands) -> Result<()> {
    match command {
        LockoutsCommands::Get { key } => {
            let lockout: Value = client.get_wrapped(&format!("/admin/lockouts/{key}")).await?;
            println!("{}", serde_json::to_string_pretty(&lockout).unwrap_or_else(|_| lockout.to_string()));
        }
        LockoutsCommands::Clear { key } => {
            client.delete(&format!("/admin/lockouts/{key}")).await?;
            println!("{} {key}", "cleared".green().bold());
        }
    }
    Ok(())
}
