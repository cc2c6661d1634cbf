//! actionsync-server binary entry point.
//!
//! Usage:
//! ```bash
//! ACTIONSYNC_CONTROL_SECRET=secret actionsync-server
//! actionsync-server --config server.toml
//! actionsync-server --port 31337 --supports 1.x
//! ```

use actionsync_server::{Server, ServerOptions};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = ServerOptions::load()?;
    let server = Arc::new(Server::new(options)?);
    server.listen().await?;
    Ok(())
}
