use anyhow::Result;
use serde_json::Value;

use crate::client::AdminClient;

pub async fn execute(client: &AdminClient) -> Result<()> {
    let snapshot: Value = client.get_wrapped("/admin/metrics").await?;
    println!("{}", serde_json::to_string_pretty(&snapshot).unwrap_or_else(|_| snapshot.to_string()));
    Ok(())
}
