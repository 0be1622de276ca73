use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use crate::client::AdminClient;

#[derive(Subcommand)]
pub enum RevocationsCommands {
    /// Revoke a single token by its jti claim
    RevokeJti {
        #[arg(value_name = "JTI")]
        jti: String,
    },

    /// Revoke every token issued to a user before now
    RevokeUser {
        #[arg(value_name = "USER_ID")]
        id: String,
    },
}

pub async fn execute(client: &AdminClient, command: RevocationsCommands) -> Result<()> {
    match command {
        RevocationsCommands::RevokeJti { jti } => {
            client.post_no_content(&format!("/admin/revocations/jti/{jti}")).await?;
            println!("{} jti {jti}", "revoked".green().bold());
        }
        RevocationsCommands::RevokeUser { id } => {
            client.post_no_content(&format!("/admin/revocations/user/{id}")).await?;
            println!("{} user {id}", "revoked".green().bold());
        }
    }
    Ok(())
}
