//! Crash Round Server
//!
//! Runs the round engine, serves observers over WebSocket and the account API
//! over HTTP until Ctrl-C.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crash_round::{AccountConfig, AccountService, GameServer, Ledger, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env();
    info!("Crash Round Server v{}", VERSION);
    info!(
        "Bind {} | HTTP {} | bootstrap {:?} | countdown {}s | tick {:?} | cooldown {:?}",
        config.bind_addr,
        config.http_addr,
        config.bootstrap,
        config.round.countdown_secs,
        config.round.progress_tick,
        config.round.cooldown
    );

    let accounts = Arc::new(AccountService::new(
        &AccountConfig::from_env(),
        Arc::new(Ledger::new()),
    ));
    let server = GameServer::new(config).with_accounts(accounts);
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received");
                let _ = shutdown.send(());
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await?;
    info!("Server stopped");
    Ok(())
}
