//! leadgate server binary
//!
//! Loads configuration from `leadgate.*` files and `LEADGATE_*` environment
//! variables and serves the submission gateway.

use server::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = ServerConfig::load()?;

    // Start server
    server::start_server(config).await?;

    Ok(())
}
