use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde_json::Value;

use crate::client::AdminClient;

#[derive(Subcommand)]
pub enum ServicesCommands {
    /// Register a new upstream service from a ServiceRegistration JSON file
    Register {
        /// Path to a JSON file holding a ServiceRegistration body
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// List every registered service
    List,

    /// Update a service's registration (requires its current version)
    Update {
        #[arg(value_name = "SERVICE_ID")]
        id: String,

        /// Path to a JSON file holding the new ServiceRegistration body
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// The version currently on record, for optimistic concurrency
        #[arg(long, value_name = "VERSION")]
        expected_version: u64,
    },

    /// Deregister a service
    Deregister {
        #[arg(value_name = "SERVICE_ID")]
        id: String,
    },

    /// Rotate the signing keys used to sign tokens for this gateway instance
    RotateKeys {
        #[arg(value_name = "SERVICE_ID")]
        id: String,
    },
}

pub async fn execute(client: &AdminClient, command: ServicesCommands) -> Result<()> {
    match command {
        ServicesCommands::Register { file } => {
            let registration = read_json(&file)?;
            let created: Value = client.post_created("/admin/services", &registration).await?;
            println!("{} {}", "registered".green().bold(), pretty(&created));
        }
        ServicesCommands::List => {
            let services: Vec<Value> = client.get_wrapped("/admin/services").await?;
            for service in services {
                println!("{}", pretty(&service));
            }
        }
        ServicesCommands::Update { id, file, expected_version } => {
            let registration = read_json(&file)?;
            let body = serde_json::json!({ "registration": registration, "expectedVersion": expected_version });
            let updated: Value = client.put_wrapped(&format!("/admin/services/{id}"), &body).await?;
            println!("{} {}", "updated".green().bold(), pretty(&updated));
        }
        ServicesCommands::Deregister { id } => {
            client.delete(&format!("/admin/services/{id}")).await?;
            println!("{} {id}", "deregistered".green().bold());
        }
        ServicesCommands::RotateKeys { id } => {
            let key: Value = client.post_wrapped(&format!("/admin/services/{id}/keys/rotate"), &Value::Null).await?;
            println!("{} {}", "new signing key".green().bold(), pretty(&key));
        }
    }
    Ok(())
}

fn read_json(path: &PathBuf) -> Result<Value> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {} as JSON", path.display()))
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
