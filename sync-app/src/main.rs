//! actionsync-app binary entry point.
//!
//! The client bootstrap: binds a store-creation function to the sync
//! settings, creates the store from the application reducer, attaches the
//! connection-status badge and the event logger, starts the client, and
//! renders the state to the terminal whenever it changes.

use sync_client::{badge, log, BadgeMessages, ClientOptions, StoreCreator};
use tracing_subscriber::EnvFilter;

mod reducer;

const LOCAL_SERVER: &str = "ws://localhost:31337";
const REMOTE_SERVER: &str = "wss://sync.example.com";

/// Server endpoint for the given environment mode: `development` talks to
/// a local server, anything else to the production one.
fn endpoint_for(mode: Option<&str>) -> &'static str {
    match mode {
        Some("development") => LOCAL_SERVER,
        _ => REMOTE_SERVER,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mode = std::env::var("ACTIONSYNC_ENV").ok();
    let creator = StoreCreator::new(ClientOptions {
        subprotocol: "1.0.0".to_string(),
        server: endpoint_for(mode.as_deref()).to_string(),
        user_id: None,
        credentials: String::new(),
    });

    let store = creator.create(reducer::initial_state(), reducer::reducer);
    badge(store.client(), BadgeMessages::english());
    log(store.client());
    store.client().start()?;

    println!("{}", store.get_state());
    store.subscribe(|state| println!("{state}"));

    tokio::signal::ctrl_c().await?;
    Ok(())
}
