use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde_json::Value;

use crate::client::AdminClient;

#[derive(Subcommand)]
pub enum TranslationsCommands {
    /// Upload a new token-translation schema version (inactive until activated)
    Create {
        /// Path to a JSON file holding a TranslationSchema body
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(long, value_name = "NAME")]
        created_by: String,

        #[arg(long, value_name = "TEXT")]
        comment: Option<String>,
    },

    /// List every translation config version on record
    List,

    /// Activate a translation config version
    Activate {
        #[arg(value_name = "VERSION_ID")]
        id: String,
    },
}

pub async fn execute(client: &AdminClient, command: TranslationsCommands) -> Result<()> {
    match command {
        TranslationsCommands::Create { file, created_by, comment } => {
            let raw = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let schema: Value =
                serde_json::from_str(&raw).with_context(|| format!("parsing {} as JSON", file.display()))?;
            let body = serde_json::json!({ "schema": schema, "createdBy": created_by, "comment": comment });
            let created: Value = client.post_created("/admin/translations", &body).await?;
            println!("{} {}", "created".green().bold(), pretty(&created));
        }
        TranslationsCommands::List => {
            let versions: Vec<Value> = client.get_wrapped("/admin/translations").await?;
            for version in versions {
                println!("{}", pretty(&version));
            }
        }
        TranslationsCommands::Activate { id } => {
            let activated: Value = client.post_wrapped(&format!("/admin/translations/{id}/activate"), &Value::Null).await?;
            println!("{} {}", "activated".green().bold(), pretty(&activated));
        }
    }
    Ok(())
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
